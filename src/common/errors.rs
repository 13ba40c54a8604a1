//! Error types for chat log storage and service setup.

use thiserror::Error;

/// Chat log subsystem error type.
#[derive(Debug, Error)]
pub enum ChatLogError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A record that cannot be stored or decoded.
    #[error("invalid chat log record: {0}")]
    InvalidRecord(String),
    /// A record with the same conversation id already exists.
    #[error("chat log already exists for conversation {0}")]
    DuplicateKey(String),
    /// `SQLite` storage error.
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias for chat log operations.
pub type ChatLogResult<T> = Result<T, ChatLogError>;
