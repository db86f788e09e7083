//! Error taxonomy for the world server.
//!
//! Internal code only ever deals in these types; the `replies` module is the
//! single place where they turn into text a player reads.

use crate::persistence::DocumentKind;

/// Failure to read or write one of the persisted documents
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {kind} document: {source}")]
    Io {
        kind: DocumentKind,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {kind} document: {source}")]
    Format {
        kind: DocumentKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("save of {0} document rejected")]
    Rejected(DocumentKind),

    #[error("save of {kind} document did not complete: {source}")]
    Interrupted {
        kind: DocumentKind,
        #[source]
        source: tokio::task::JoinError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("unknown user")]
    UnknownUser,

    #[error("invalid credential")]
    InvalidCredential,

    #[error("account already exists")]
    AccountExists,

    #[error("user already online")]
    AlreadyOnline,
}

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("character '{0}' not found")]
    NotFound(String),

    #[error("clan '{0}' already exists")]
    ClanExists(String),

    #[error("'{0}' already belongs to a clan")]
    AlreadyInClan(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Malformed command input; recovered locally with a reply
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("missing argument for '{0}'")]
    MissingArgument(&'static str),

    #[error("invalid direction '{0}'")]
    InvalidDirection(String),
}

/// Reasons a session stops running
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("idle timeout")]
    IdleTimeout,

    #[error("server shutting down")]
    Shutdown,

    #[error("connection closed by peer")]
    PeerClosed,
}
