//! Error types shared by every DealNudge crate.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DealNudgeError>;

#[derive(Debug, Error)]
pub enum DealNudgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Lock backend error: {0}")]
    Lock(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Entity store error: {0}")]
    Store(String),

    #[error("Job error: {0}")]
    Job(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Lock key {key} is used by both '{first}' and '{second}'")]
    DuplicateLockKey {
        key: i64,
        first: String,
        second: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
