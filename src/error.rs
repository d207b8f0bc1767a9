//! Error types for the sync engine.

use crate::connection::ConnectionState;
use crate::types::Sequence;
use thiserror::Error;

/// Errors produced by an upstream feed.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FeedError {
    /// The transport dropped or failed. Recovered by reconnecting.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The upstream cannot resume from the given cursor.
    #[error("Cursor rejected by upstream: {cursor:?}")]
    CursorRejected { cursor: Sequence },

    /// A message could not be decoded. Dropped without reconnecting.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The feed source no longer exists.
    #[error("Feed closed")]
    Closed,
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Malformed(e.to_string())
    }
}

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Invalid connection transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
