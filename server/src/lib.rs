//! # Line World Server Library
//!
//! This library provides the server for a small text-protocol multiplayer
//! world. Players connect over TCP, register or log in, and then issue
//! slash commands that move their character on a bounded grid, inspect other
//! characters, found clans and chat with everyone who is online.
//!
//! ## Core Responsibilities
//!
//! ### World Store
//! Holds every account, character and clan. All reads and mutations go
//! through one lock, and every mutation is written to durable storage before
//! it becomes visible. A failed write leaves the in-memory state untouched.
//!
//! ### Sessions
//! Each connection runs its own task. The task owns the socket, gates the
//! player behind `/register` or `/login`, and then dispatches commands.
//!
//! ### Presence
//! The online registry tracks which usernames currently have a live session,
//! refuses a second concurrent login and fans out world chat.
//!
//! ## Protocol
//!
//! UTF-8 text, one message per `\n`-terminated line in both directions.
//! A trailing `\r` is tolerated. Lines starting with `/` are commands; the
//! command name is matched case-insensitively.
//!
//! ```text
//! S: Enter a command: /register or /login.
//! C: /register
//! S: Enter username:
//! C: bob
//! S: Enter password:
//! C: secret
//! S: Registration successful!
//! S: Welcome! Type /help for the list of commands.
//! C: /move north
//! S: Your location: (0, 1)
//! ```
//!
//! ## Module Organization
//!
//! ### World Module (`world`)
//! Characters, clans, accounts and the lock that serializes them.
//!
//! ### Persistence Module (`persistence`)
//! The storage boundary: JSON documents on disk, or in memory for tests.
//!
//! ### Session Module (`session`)
//! The per-connection authentication state machine and read loop.
//!
//! ### Commands Module (`commands`)
//! Parsing and executing post-login commands.
//!
//! ### Registry Module (`registry`)
//! Who is online, and the mailboxes used to reach them.
//!
//! ### Network Module (`network`)
//! The TCP acceptor, session supervision and shutdown.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::{shutdown_signal, Server};
//! use server::persistence::JsonFilePersistence;
//! use server::world::WorldStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let persistence = Arc::new(JsonFilePersistence::new(config.data.clone()));
//!     let world = Arc::new(WorldStore::load(persistence, config.bounds)?);
//!
//!     let server = Server::bind(&config, world).await?;
//!     server.run(shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod credential;
pub mod error;
pub mod network;
pub mod persistence;
pub mod registry;
pub mod replies;
pub mod session;
pub mod world;
