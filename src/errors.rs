//! Typed error hierarchy for glu.
//!
//! A single `Error` enum is shared by every subsystem so that callers can
//! distinguish the expected outcomes (`NotFound`, `AlreadyExists`,
//! `Conflict`, `NoChange`) from genuine failures by matching, or through
//! the `is_*` helpers.

use thiserror::Error;

/// Errors produced by the promotion engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A phase, edge, branch, bucket, version or blob does not exist.
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// A phase or edge with the same identity is already registered.
    #[error("{what} already exists: {name}")]
    AlreadyExists { what: &'static str, name: String },

    /// The branch head moved since it was observed, or the remote
    /// rejected a push.
    #[error("Conflict on {reference}: {message}")]
    Conflict { reference: String, message: String },

    /// A write produced a tree identical to its parent.
    #[error("No change: {0}")]
    NoChange(String),

    /// Missing or invalid configuration (including a phase asked to
    /// propose without a proposer).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Remote interaction (fetch, push, registry) failed.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            what,
            name: name.into(),
        }
    }

    pub fn already_exists(what: &'static str, name: impl Into<String>) -> Self {
        Error::AlreadyExists {
            what,
            name: name.into(),
        }
    }

    pub fn conflict(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Conflict {
            reference: reference.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    pub fn is_no_change(&self) -> bool {
        matches!(self, Error::NoChange(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned
    }
}
