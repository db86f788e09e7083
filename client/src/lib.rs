//! # Line World Client Library
//!
//! A minimal terminal client for the line world server. Everything typed on
//! stdin is sent to the server as one line; every line the server sends is
//! printed to stdout. The server drives the conversation, so the client has
//! no knowledge of commands or authentication beyond relaying text.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - `Connection`: a line-oriented TCP connection with read timeouts,
//!   also used by the integration tests to script sessions
//! - `Client`: the interactive stdin/stdout relay
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Connection;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut connection = Connection::connect("localhost:12344").await?;
//!     connection.read_line().await?; // authentication prompt
//!
//!     connection.send_line("/login").await?;
//!     let reply = connection.read_line_timeout(Duration::from_secs(5)).await?;
//!     println!("{:?}", reply);
//!     Ok(())
//! }
//! ```

pub mod network;
