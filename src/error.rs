//! Error type shared by every component of the index.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the keyspace index.
pub type Result<T> = std::result::Result<T, KeyspaceError>;

/// Errors raised by the keyspace index and its collaborators.
#[derive(Debug, Error)]
pub enum KeyspaceError {
    /// The store connection dropped; the current scan generation is aborted.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// A key name could not be decoded as text.
    #[error("malformed key name ({} bytes)", raw.len())]
    MalformedKeyName {
        /// Raw bytes as returned by the store.
        raw: Vec<u8>,
    },
    /// A filter slice exhausted its time budget before finishing.
    #[error("filter generation {generation} yielded after {processed} candidates ({elapsed:?})")]
    FilterTimeout {
        /// Filter generation the slice belonged to.
        generation: u64,
        /// Candidates scored so far.
        processed: usize,
        /// Time spent in the slice.
        elapsed: Duration,
    },
    /// Background work was abandoned because a newer generation replaced it.
    #[error("operation cancelled")]
    Cancelled,
    /// Lookup target does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A background worker is no longer running.
    #[error("{0} worker is not running")]
    WorkerGone(&'static str),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl KeyspaceError {
    /// Whether the operation may succeed if simply resumed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KeyspaceError::FilterTimeout { .. })
    }

    /// Whether the error invalidates the connection epoch.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, KeyspaceError::ConnectionLost(_))
    }
}
