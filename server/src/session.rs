//! Per-connection session: authentication gate and command loop
//!
//! A session owns both halves of its connection. It reads one line at a
//! time, runs the authentication state machine until the player is online,
//! and then hands every line to the command dispatcher. Messages from other
//! players arrive through the session's mailbox and are written by the
//! session itself, so nothing else ever touches its socket.
//!
//! ```text
//! Unauthenticated --/register--> Registering --ok--> Authenticated --> Closed
//!        ^    \                        |
//!        |     --/login--> LoggingIn --+--ok--> Authenticated
//!        +----------- rejected --------+
//! ```

use crate::commands::{CommandContext, Outcome};
use crate::config::FreeTextPolicy;
use crate::error::{AuthError, SessionError};
use crate::registry::{ConnectionId, OnlineRegistry, SessionHandle};
use crate::replies;
use crate::world::WorldStore;
use log::{debug, info, warn};
use shared::{parse_line, Line};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Registering,
    LoggingIn,
    Authenticated(String),
    Closed,
}

/// Shared services and settings every session runs with
#[derive(Clone)]
pub struct SessionContext {
    pub world: Arc<WorldStore>,
    pub registry: Arc<OnlineRegistry>,
    pub free_text: FreeTextPolicy,
    pub idle_timeout: Option<Duration>,
    pub mailbox_capacity: usize,
    pub max_line_bytes: usize,
}

enum Event {
    Line(String),
    Message(String),
}

/// Outcome of a /register or /login exchange
enum Attempt {
    Accepted {
        username: String,
        greeting: &'static str,
    },
    Rejected(String),
}

pub struct Session<R, W> {
    connection_id: ConnectionId,
    remote_addr: SocketAddr,
    reader: BufReader<R>,
    /// Bytes of the line being read; survives a cancelled read
    pending: Vec<u8>,
    /// Skipping the rest of an over-long line
    discarding: bool,
    writer: W,
    state: AuthState,
    mailbox: Option<mpsc::Receiver<String>>,
    ctx: SessionContext,
    shutdown: watch::Receiver<bool>,
    idle_deadline: Option<Instant>,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        connection_id: ConnectionId,
        remote_addr: SocketAddr,
        reader: R,
        writer: W,
        ctx: SessionContext,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let idle_deadline = ctx.idle_timeout.map(|timeout| Instant::now() + timeout);
        Self {
            connection_id,
            remote_addr,
            reader: BufReader::new(reader),
            pending: Vec::new(),
            discarding: false,
            writer,
            state: AuthState::Unauthenticated,
            mailbox: None,
            ctx,
            shutdown,
            idle_deadline,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// Runs the session until the connection ends, then releases everything it holds
    pub async fn run(mut self) {
        debug!(
            "Session {} started for {}",
            self.connection_id, self.remote_addr
        );

        match self.drive().await {
            Ok(()) => {}
            Err(SessionError::PeerClosed) => {
                debug!("Connection {} closed by peer", self.connection_id);
            }
            Err(SessionError::IdleTimeout) => {
                info!("Connection {} idle, closing", self.connection_id);
                let _ = self.send(replies::IDLE_TIMEOUT).await;
            }
            Err(SessionError::Shutdown) => {
                let _ = self.send(replies::SHUTTING_DOWN).await;
            }
            Err(SessionError::Transport(e)) => {
                warn!("Connection {} transport error: {}", self.connection_id, e);
            }
        }

        self.close().await;
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        let username = self.authenticate().await?;
        self.command_loop(&username).await
    }

    /// Loops until a player is online; nothing but /register and /login gets through
    async fn authenticate(&mut self) -> Result<String, SessionError> {
        self.send(replies::AUTH_PROMPT).await?;

        loop {
            let line = self.read_line().await?;
            let attempt = match parse_line(&line) {
                Line::Command { name, .. } if name == "register" => {
                    self.state = AuthState::Registering;
                    self.register().await?
                }
                Line::Command { name, .. } if name == "login" => {
                    self.state = AuthState::LoggingIn;
                    self.login().await?
                }
                _ => {
                    self.send(replies::UNRECOGNIZED_AUTH_COMMAND).await?;
                    continue;
                }
            };

            let rejection = match attempt {
                Attempt::Accepted { username, greeting } => match self.go_online(&username).await {
                    Ok(()) => {
                        self.send(greeting).await?;
                        self.send(replies::WELCOME).await?;
                        return Ok(username);
                    }
                    Err(e) => replies::auth_error(e).to_string(),
                },
                Attempt::Rejected(message) => message,
            };

            self.state = AuthState::Unauthenticated;
            self.send(&rejection).await?;
            self.send(replies::AUTH_PROMPT).await?;
        }
    }

    async fn register(&mut self) -> Result<Attempt, SessionError> {
        self.send(replies::USERNAME_PROMPT).await?;
        let username = self.read_line().await?.trim().to_string();
        if username.is_empty() {
            return Ok(Attempt::Rejected(replies::EMPTY_USERNAME.to_string()));
        }
        if self.ctx.world.account_exists(&username).await {
            return Ok(Attempt::Rejected(
                replies::auth_error(AuthError::AccountExists).to_string(),
            ));
        }

        self.send(replies::PASSWORD_PROMPT).await?;
        let password = self.read_line().await?.trim().to_string();
        if password.is_empty() {
            return Ok(Attempt::Rejected(replies::EMPTY_PASSWORD.to_string()));
        }

        Ok(match self.ctx.world.create_account(&username, &password).await {
            Ok(_) => Attempt::Accepted {
                username,
                greeting: replies::REGISTERED,
            },
            Err(e) => Attempt::Rejected(replies::world_error(&e)),
        })
    }

    async fn login(&mut self) -> Result<Attempt, SessionError> {
        self.send(replies::USERNAME_PROMPT).await?;
        let username = self.read_line().await?.trim().to_string();
        if !self.ctx.world.account_exists(&username).await {
            return Ok(Attempt::Rejected(
                replies::auth_error(AuthError::UnknownUser).to_string(),
            ));
        }

        self.send(replies::PASSWORD_PROMPT).await?;
        let password = self.read_line().await?.trim().to_string();

        Ok(match self.ctx.world.authenticate(&username, &password).await {
            Ok(()) => Attempt::Accepted {
                username,
                greeting: replies::LOGGED_IN,
            },
            Err(e) => {
                warn!(
                    "Failed login for {} from {}: {}",
                    username, self.remote_addr, e
                );
                Attempt::Rejected(replies::auth_error(e).to_string())
            }
        })
    }

    async fn go_online(&mut self, username: &str) -> Result<(), AuthError> {
        let (sender, receiver) = mpsc::channel(self.ctx.mailbox_capacity.max(1));
        let handle = SessionHandle::new(self.connection_id, self.remote_addr, sender);
        self.ctx.registry.register(username, handle).await?;

        self.mailbox = Some(receiver);
        self.state = AuthState::Authenticated(username.to_string());
        Ok(())
    }

    async fn command_loop(&mut self, username: &str) -> Result<(), SessionError> {
        loop {
            let line = match self.next_event().await? {
                Event::Message(message) => {
                    self.send(&message).await?;
                    continue;
                }
                Event::Line(line) => line,
            };

            let ctx = CommandContext {
                username,
                remote_addr: self.remote_addr,
                world: &self.ctx.world,
                registry: &self.ctx.registry,
                free_text: self.ctx.free_text,
            };

            match ctx.dispatch(&line).await {
                Outcome::Reply(text) => self.send(&text).await?,
                Outcome::Silent => {}
                Outcome::Disconnect(farewell) => {
                    self.send(&farewell).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Waits for the next client line, forwarding mailbox messages meanwhile
    async fn read_line(&mut self) -> Result<String, SessionError> {
        loop {
            match self.next_event().await? {
                Event::Line(line) => return Ok(line),
                Event::Message(message) => self.send(&message).await?,
            }
        }
    }

    async fn next_event(&mut self) -> Result<Event, SessionError> {
        loop {
            // One byte past the limit tells an over-long line from a full one
            let budget = (self.ctx.max_line_bytes + 1).saturating_sub(self.pending.len());
            let mut reader = (&mut self.reader).take(budget.max(1) as u64);
            let mailbox = &mut self.mailbox;

            tokio::select! {
                read = reader.read_until(b'\n', &mut self.pending) => {
                    let read = read?;
                    if let Some(line) = self.take_line(read).await? {
                        return Ok(Event::Line(line));
                    }
                }
                Some(message) = next_message(mailbox) => return Ok(Event::Message(message)),
                _ = idle_expired(self.idle_deadline) => return Err(SessionError::IdleTimeout),
                _ = shutdown_requested(&mut self.shutdown) => return Err(SessionError::Shutdown),
            }
        }
    }

    /// Turns the bytes read so far into a line, if they complete one
    async fn take_line(&mut self, read: usize) -> Result<Option<String>, SessionError> {
        let terminated = self.pending.last() == Some(&b'\n');

        if self.discarding {
            self.pending.clear();
            if terminated {
                self.discarding = false;
            } else if read == 0 {
                return Err(SessionError::PeerClosed);
            }
            return Ok(None);
        }

        if read == 0 {
            return Err(SessionError::PeerClosed);
        }

        if !terminated && self.pending.len() > self.ctx.max_line_bytes {
            warn!(
                "Connection {} sent a line over {} bytes, discarding it",
                self.connection_id, self.ctx.max_line_bytes
            );
            self.pending.clear();
            self.discarding = true;
            self.send(replies::LINE_TOO_LONG).await?;
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.pending.clear();
        self.idle_deadline = self.ctx.idle_timeout.map(|timeout| Instant::now() + timeout);
        Ok(Some(line))
    }

    async fn send(&mut self, text: &str) -> Result<(), SessionError> {
        let mut frame = String::with_capacity(text.len() + 1);
        frame.push_str(text);
        frame.push('\n');
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, AuthState::Closed);
        if let AuthState::Authenticated(username) = state {
            self.ctx.registry.deregister(&username).await;
        }
        self.mailbox = None;
        let _ = self.writer.shutdown().await;
        info!(
            "Connection {} from {} closed",
            self.connection_id, self.remote_addr
        );
    }
}

async fn next_message(mailbox: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match mailbox {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn idle_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolves once shutdown is signalled; never resolves if the signal is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
