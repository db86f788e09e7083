use clap::Parser;
use log::{error, info};
use server::config::{FreeTextPolicy, ServerConfig, ShutdownMode};
use server::network::{shutdown_signal, Server};
use server::persistence::{DataPaths, JsonFilePersistence};
use server::world::WorldStore;
use shared::{MapBounds, DEFAULT_HOST, DEFAULT_PORT, MAP_HEIGHT, MAP_WIDTH};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host name or IP address to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Map width; valid x coordinates are -(width-1)..=(width-1)
    #[arg(long, default_value_t = MAP_WIDTH, value_parser = clap::value_parser!(i32).range(1..))]
    map_width: i32,

    /// Map height; valid y coordinates are -(height-1)..=(height-1)
    #[arg(long, default_value_t = MAP_HEIGHT, value_parser = clap::value_parser!(i32).range(1..))]
    map_height: i32,

    #[arg(long, default_value = "user_data.json")]
    accounts_file: PathBuf,

    #[arg(long, default_value = "player_data.json")]
    characters_file: PathBuf,

    #[arg(long, default_value = "clan_data.json")]
    clans_file: PathBuf,

    /// Extra attributes given to every new character
    #[arg(long, default_value = "character_defaults.json")]
    character_defaults: PathBuf,

    /// What to do with lines that are not commands
    #[arg(long, value_enum, default_value_t = FreeTextPolicy::Ignore)]
    free_text: FreeTextPolicy,

    /// How open sessions are closed on shutdown
    #[arg(long, value_enum, default_value_t = ShutdownMode::Graceful)]
    shutdown: ShutdownMode,

    /// Seconds to wait for sessions to close in graceful mode
    #[arg(long, default_value_t = 10)]
    drain_timeout_secs: u64,

    /// Seconds of silence before a connection is dropped, 0 to disable
    #[arg(long, default_value_t = 600)]
    idle_timeout_secs: u64,

    /// Pending outbound messages per session before broadcasts are dropped
    #[arg(long, default_value_t = 64)]
    mailbox_capacity: usize,

    /// Longest line a client may send; longer lines are discarded
    #[arg(long, default_value_t = 1024, value_parser = clap::value_parser!(u32).range(1..))]
    max_line_bytes: u32,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            bounds: MapBounds::new(args.map_width, args.map_height),
            data: DataPaths {
                accounts: args.accounts_file,
                characters: args.characters_file,
                clans: args.clans_file,
                character_defaults: args.character_defaults,
            },
            free_text: args.free_text,
            shutdown: args.shutdown,
            drain_timeout: Duration::from_secs(args.drain_timeout_secs),
            idle_timeout: (args.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(args.idle_timeout_secs)),
            mailbox_capacity: args.mailbox_capacity,
            max_line_bytes: args.max_line_bytes as usize,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from(Args::parse());

    info!("Starting server...");
    info!(
        "Map: {}x{}, free text: {:?}, shutdown: {:?}",
        config.bounds.width, config.bounds.height, config.free_text, config.shutdown
    );

    let persistence = Arc::new(JsonFilePersistence::new(config.data.clone()));
    let bounds = config.bounds;
    let loaded = tokio::task::spawn_blocking(move || WorldStore::load(persistence, bounds)).await?;
    let world = match loaded {
        Ok(world) => Arc::new(world),
        Err(e) => {
            error!("Failed to load world data: {}", e);
            return Err(e.into());
        }
    };

    let server = Server::bind(&config, world).await?;
    server.run(shutdown_signal()).await?;

    Ok(())
}
