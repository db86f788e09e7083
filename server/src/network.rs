//! Server network layer: accepting connections and supervising sessions

use crate::config::{ServerConfig, ShutdownMode};
use crate::registry::{ConnectionId, OnlineRegistry};
use crate::session::{Session, SessionContext};
use crate::world::WorldStore;
use log::{debug, error, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};

/// Releases a connection's presence when its task ends, however it ends.
///
/// A session deregisters itself on a normal close; this covers the task
/// panicking or being aborted before it got there.
struct PresenceGuard {
    registry: Arc<OnlineRegistry>,
    connection_id: ConnectionId,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let connection_id = self.connection_id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                registry.release(connection_id).await;
            });
        }
    }
}

/// Accepts connections and runs one session task per connection
pub struct Server {
    listener: TcpListener,
    ctx: SessionContext,
    shutdown_mode: ShutdownMode,
    drain_timeout: Duration,
    next_connection_id: ConnectionId,
}

impl Server {
    pub async fn bind(config: &ServerConfig, world: Arc<WorldStore>) -> std::io::Result<Self> {
        let address = config.address();
        let listener = TcpListener::bind(&address).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            ctx: SessionContext {
                world,
                registry: Arc::new(OnlineRegistry::new()),
                free_text: config.free_text,
                idle_timeout: config.idle_timeout,
                mailbox_capacity: config.mailbox_capacity,
                max_line_bytes: config.max_line_bytes,
            },
            shutdown_mode: config.shutdown,
            drain_timeout: config.drain_timeout,
            next_connection_id: 1,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<OnlineRegistry> {
        Arc::clone(&self.ctx.registry)
    }

    /// Accepts connections until `shutdown` resolves, then closes the sessions
    /// according to the configured shutdown mode.
    pub async fn run<F>(mut self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        info!("Server started successfully");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        self.spawn_session(&mut sessions, stream, addr, shutdown_rx.clone());
                    }
                    Err(e) => {
                        // Usually descriptor exhaustion; back off instead of spinning
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    report_session_end(joined);
                }
            }
        }

        info!("Server shutting down, {} sessions open", sessions.len());
        drop(self.listener);

        match self.shutdown_mode {
            ShutdownMode::Graceful => {
                let _ = shutdown_tx.send(true);
                let drain = async {
                    while let Some(joined) = sessions.join_next().await {
                        report_session_end(joined);
                    }
                };
                if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
                    warn!(
                        "Drain timeout reached, aborting {} sessions",
                        sessions.len()
                    );
                    sessions.shutdown().await;
                }
            }
            ShutdownMode::Force => {
                sessions.shutdown().await;
            }
        }

        info!("Server stopped");
        Ok(())
    }

    fn spawn_session(
        &mut self,
        sessions: &mut JoinSet<()>,
        stream: TcpStream,
        addr: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) {
        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;
        info!("New connection {} from {}", connection_id, addr);

        let (reader, writer) = stream.into_split();
        let session = Session::new(
            connection_id,
            addr,
            reader,
            writer,
            self.ctx.clone(),
            shutdown,
        );
        let guard = PresenceGuard {
            registry: Arc::clone(&self.ctx.registry),
            connection_id,
        };

        sessions.spawn(async move {
            let _guard = guard;
            session.run().await;
        });
    }
}

fn report_session_end(joined: Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!("Session task panicked: {}", e),
        Err(e) => debug!("Session task cancelled: {}", e),
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }

    info!("Received shutdown signal");
}
