//! Error types for sitepulse-core

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sitepulse-core
#[derive(Error, Debug)]
pub enum Error {
    /// Key/value backend errors (quota, disabled storage, security restrictions)
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite errors from the persistent backend
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Transport-level send failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify whether this error leaves the agent able to continue.
    ///
    /// Nothing in the core is fatal to the host: every variant degrades to
    /// either silent fallback or deferred retry.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        true
    }
}
