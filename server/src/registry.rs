//! Online presence for authenticated sessions
//!
//! The registry maps each logged-in username to a handle for the session
//! serving it. It is the only place other sessions can reach a player
//! through: messages are pushed into the session's mailbox, and the session
//! writes them to its own socket. No socket is ever touched from here.

use crate::error::AuthError;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

/// Identifies one accepted connection for the lifetime of the server
pub type ConnectionId = u64;

/// Addressable side of a live session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub connection_id: ConnectionId,
    pub addr: SocketAddr,
    mailbox: mpsc::Sender<String>,
}

impl SessionHandle {
    pub fn new(connection_id: ConnectionId, addr: SocketAddr, mailbox: mpsc::Sender<String>) -> Self {
        Self {
            connection_id,
            addr,
            mailbox,
        }
    }

    /// Queues a message without waiting; fails if the mailbox is full or closed
    pub fn deliver(&self, message: &str) -> Result<(), TrySendError<String>> {
        self.mailbox.try_send(message.to_string())
    }
}

#[derive(Debug, Default)]
pub struct OnlineRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl OnlineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `username` as online. A second session for the same name is refused.
    pub async fn register(&self, username: &str, handle: SessionHandle) -> Result<(), AuthError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(username) {
            return Err(AuthError::AlreadyOnline);
        }

        info!(
            "{} online on connection {} from {}",
            username, handle.connection_id, handle.addr
        );
        sessions.insert(username.to_string(), handle);
        Ok(())
    }

    /// Returns true if the user was online
    pub async fn deregister(&self, username: &str) -> bool {
        let removed = self.sessions.write().await.remove(username);
        if let Some(handle) = &removed {
            info!("{} offline (connection {})", username, handle.connection_id);
        }
        removed.is_some()
    }

    /// Drops whatever identity `connection_id` held, if any.
    ///
    /// Used after a session task ends so that presence is cleaned up even
    /// when the session never reached its own deregistration.
    pub async fn release(&self, connection_id: ConnectionId) -> Option<String> {
        let mut sessions = self.sessions.write().await;
        let username = sessions
            .iter()
            .find(|(_, handle)| handle.connection_id == connection_id)
            .map(|(name, _)| name.clone())?;

        sessions.remove(&username);
        warn!(
            "Released {} left online by connection {}",
            username, connection_id
        );
        Some(username)
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.sessions.read().await.contains_key(username)
    }

    pub async fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Delivers `message` to every online session, best effort.
    ///
    /// Returns how many sessions accepted it. A full or closed mailbox only
    /// costs that one recipient the message.
    pub async fn broadcast(&self, message: &str) -> usize {
        self.deliver_all(message, None).await
    }

    /// Like [`broadcast`](Self::broadcast), but skips `sender`, who gets the
    /// message as a direct reply instead.
    pub async fn broadcast_from(&self, sender: &str, message: &str) -> usize {
        self.deliver_all(message, Some(sender)).await
    }

    async fn deliver_all(&self, message: &str, skip: Option<&str>) -> usize {
        let recipients: Vec<(String, SessionHandle)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(name, _)| Some(name.as_str()) != skip)
                .map(|(name, handle)| (name.clone(), handle.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (name, handle) in recipients {
            match handle.deliver(message) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => warn!("Mailbox of {} is full, message dropped", name),
                Err(TrySendError::Closed(_)) => debug!("Mailbox of {} is closed", name),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:12344".parse().unwrap()
    }

    fn handle(connection_id: ConnectionId, capacity: usize) -> (SessionHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (SessionHandle::new(connection_id, test_addr(), tx), rx)
    }

    #[tokio::test]
    async fn test_register_and_count() {
        let registry = OnlineRegistry::new();
        assert_eq!(registry.count().await, 0);

        let (a, _rx_a) = handle(1, 4);
        let (b, _rx_b) = handle(2, 4);
        registry.register("alice", a).await.unwrap();
        registry.register("bob", b).await.unwrap();

        assert_eq!(registry.count().await, 2);
        assert!(registry.is_online("alice").await);
        assert_eq!(registry.usernames().await, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_duplicate_login_refused() {
        let registry = OnlineRegistry::new();
        let (first, _rx1) = handle(1, 4);
        let (second, _rx2) = handle(2, 4);

        registry.register("alice", first).await.unwrap();
        assert_eq!(
            registry.register("alice", second).await,
            Err(AuthError::AlreadyOnline)
        );
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_deregister() {
        let registry = OnlineRegistry::new();
        let (a, _rx) = handle(1, 4);
        registry.register("alice", a).await.unwrap();

        assert!(registry.deregister("alice").await);
        assert!(!registry.deregister("alice").await);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_release_by_connection() {
        let registry = OnlineRegistry::new();
        let (a, _rx_a) = handle(7, 4);
        let (b, _rx_b) = handle(8, 4);
        registry.register("alice", a).await.unwrap();
        registry.register("bob", b).await.unwrap();

        assert_eq!(registry.release(7).await, Some("alice".to_string()));
        assert_eq!(registry.release(7).await, None);
        assert_eq!(registry.release(99).await, None);
        assert_eq!(registry.usernames().await, vec!["bob"]);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let registry = OnlineRegistry::new();
        let (a, mut rx_a) = handle(1, 4);
        let (b, mut rx_b) = handle(2, 4);
        registry.register("alice", a).await.unwrap();
        registry.register("bob", b).await.unwrap();

        assert_eq!(registry.broadcast("hello").await, 2);
        assert_eq!(rx_a.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx_b.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_broadcast_survives_failed_recipients() {
        let registry = OnlineRegistry::new();
        let (closed, rx_closed) = handle(1, 4);
        let (full, _rx_full) = handle(2, 1);
        let (healthy, mut rx_healthy) = handle(3, 4);
        drop(rx_closed);
        full.deliver("backlog").unwrap();

        registry.register("closed", closed).await.unwrap();
        registry.register("full", full).await.unwrap();
        registry.register("healthy", healthy).await.unwrap();

        assert_eq!(registry.broadcast("news").await, 1);
        assert_eq!(rx_healthy.recv().await.as_deref(), Some("news"));
    }

    #[tokio::test]
    async fn test_broadcast_from_skips_sender() {
        let registry = OnlineRegistry::new();
        let (a, mut rx_a) = handle(1, 4);
        let (b, mut rx_b) = handle(2, 4);
        registry.register("alice", a).await.unwrap();
        registry.register("bob", b).await.unwrap();

        assert_eq!(registry.broadcast_from("alice", "hi").await, 1);
        assert_eq!(rx_b.recv().await.as_deref(), Some("hi"));
        assert!(rx_a.try_recv().is_err());
    }
}
