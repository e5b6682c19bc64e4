//! Error types for the switchyard state store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// The stored slot is not a valid identifier. Never guessed around.
    #[error("registry corrupt: stored current slot {0:?} is not a valid slot")]
    RegistryCorrupt(String),

    #[error("another deployment is in progress (lock {path:?} held by {holder})")]
    Locked { path: PathBuf, holder: String },

    #[error("lock file error: {0}")]
    Lock(String),
}
