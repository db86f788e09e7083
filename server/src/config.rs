use crate::persistence::DataPaths;
use clap::ValueEnum;
use shared::{MapBounds, DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

/// What to do with a line that does not start with the command sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FreeTextPolicy {
    /// Drop the line without a reply
    #[default]
    Ignore,
    /// Treat the line as world chat
    Broadcast,
}

/// How in-flight sessions are treated once the server stops accepting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ShutdownMode {
    /// Notify sessions and wait up to the drain timeout for them to close
    #[default]
    Graceful,
    /// Abort every session immediately
    Force,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub bounds: MapBounds,
    pub data: DataPaths,
    pub free_text: FreeTextPolicy,
    pub shutdown: ShutdownMode,
    pub drain_timeout: Duration,
    /// `None` disables the idle timeout
    pub idle_timeout: Option<Duration>,
    pub mailbox_capacity: usize,
    /// Longest accepted line, excluding the newline
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            bounds: MapBounds::default(),
            data: DataPaths::default(),
            free_text: FreeTextPolicy::default(),
            shutdown: ShutdownMode::default(),
            drain_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(600)),
            mailbox_capacity: 64,
            max_line_bytes: 1024,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
