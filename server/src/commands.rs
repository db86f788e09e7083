//! Command dispatch for authenticated sessions
//!
//! A line is parsed into a [`Command`] first and only then executed, so a
//! malformed line is rejected before it can touch the world. Handlers never
//! perform network I/O: replies go back to the caller as an [`Outcome`] and
//! messages for other players go through the online registry.

use crate::config::FreeTextPolicy;
use crate::error::CommandError;
use crate::registry::OnlineRegistry;
use crate::replies;
use crate::world::WorldStore;
use shared::{parse_line, Direction, Line};
use std::net::SocketAddr;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Move(Direction),
    Info(String),
    My,
    Date,
    Ip,
    Online,
    Help,
    Clan(String),
    World(String),
    Quit,
}

impl Command {
    pub fn parse(name: &str, args: &str) -> Result<Self, CommandError> {
        let args = args.trim();
        let required = |command: &'static str| {
            if args.is_empty() {
                Err(CommandError::MissingArgument(command))
            } else {
                Ok(args.to_string())
            }
        };

        match name {
            "move" => {
                let direction = required("move")?;
                direction
                    .parse()
                    .map(Command::Move)
                    .map_err(|_| CommandError::InvalidDirection(direction))
            }
            "info" => required("info").map(Command::Info),
            "my" => Ok(Command::My),
            "date" => Ok(Command::Date),
            "ip" => Ok(Command::Ip),
            "online" => Ok(Command::Online),
            "help" => Ok(Command::Help),
            "clan" => required("clan").map(Command::Clan),
            "world" => required("world").map(Command::World),
            "quit" => Ok(Command::Quit),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

/// Result of handling one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(String),
    /// Nothing to send back directly
    Silent,
    /// Send the farewell and close the session
    Disconnect(String),
}

/// Everything a handler may use on behalf of the calling player
pub struct CommandContext<'a> {
    pub username: &'a str,
    pub remote_addr: SocketAddr,
    pub world: &'a WorldStore,
    pub registry: &'a OnlineRegistry,
    pub free_text: FreeTextPolicy,
}

impl CommandContext<'_> {
    pub async fn dispatch(&self, line: &str) -> Outcome {
        match parse_line(line) {
            Line::Empty => Outcome::Silent,
            Line::Text(text) => match self.free_text {
                FreeTextPolicy::Ignore => Outcome::Silent,
                FreeTextPolicy::Broadcast => self.execute(Command::World(text.to_string())).await,
            },
            Line::Command { name, args } => match Command::parse(&name, args) {
                Ok(command) => self.execute(command).await,
                Err(e) => Outcome::Reply(replies::command_error(&e)),
            },
        }
    }

    pub async fn execute(&self, command: Command) -> Outcome {
        match command {
            Command::Move(direction) => {
                let bounds = self.world.bounds();
                // The step is computed and bounds-checked before the store saves anything
                let moved = self
                    .world
                    .with_character(self.username, |character| {
                        character.location = bounds.step(character.location, direction);
                        character.location
                    })
                    .await;

                match moved {
                    Ok(location) => Outcome::Reply(replies::location(location)),
                    Err(e) => Outcome::Reply(replies::world_error(&e)),
                }
            }

            Command::Info(name) => match self.world.get_character(&name).await {
                Ok(character) => Outcome::Reply(replies::character_info(&character)),
                Err(e) => Outcome::Reply(replies::world_error(&e)),
            },

            Command::My => match self.world.get_character(self.username).await {
                Ok(character) => Outcome::Reply(replies::own_character(&character)),
                Err(e) => Outcome::Reply(replies::world_error(&e)),
            },

            Command::Date => {
                let now = chrono::Local::now().format(DATE_FORMAT).to_string();
                Outcome::Reply(replies::date(&now))
            }

            Command::Ip => Outcome::Reply(replies::ip(self.remote_addr.ip())),

            Command::Online => Outcome::Reply(replies::online(self.registry.count().await)),

            Command::Help => Outcome::Reply(replies::HELP.to_string()),

            Command::Clan(name) => match self.world.create_clan(self.username, &name).await {
                Ok(clan) => Outcome::Reply(replies::clan_founded(&clan)),
                Err(e) => Outcome::Reply(replies::world_error(&e)),
            },

            Command::World(message) => {
                let message = replies::world_chat(self.username, &message);
                self.registry.broadcast_from(self.username, &message).await;
                Outcome::Reply(message)
            }

            Command::Quit => Outcome::Disconnect(replies::GOODBYE.to_string()),
        }
    }
}
