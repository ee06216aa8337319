//! Common error types for Offsync.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for Offsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Task specification is malformed and was rejected before queueing.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Engine configuration is invalid (unknown strategy, missing resolver or executor).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network operation failed; retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// Task execution exceeded its time budget; retryable.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The server holds a diverged version of the record.
    #[error("Conflict: {message}")]
    Conflict {
        /// Human-readable description from the executor.
        message: String,
        /// The server's current version of the record.
        server_value: serde_json::Value,
    },

    /// Retry budget exhausted; the task stays visible but is never scheduled again.
    #[error("Task {id} failed permanently after {attempts} attempts: {last_error}")]
    TerminalTask {
        id: String,
        attempts: u32,
        last_error: String,
    },

    /// Executor reported a failure that is not network related.
    #[error("Executor error: {0}")]
    Executor(String),

    /// Operation is not valid for the current state of the target.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Build a conflict error carrying the server's version of the record.
    pub fn conflict(message: impl Into<String>, server_value: serde_json::Value) -> Self {
        Self::Conflict {
            message: message.into(),
            server_value,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
