//! Error types for the Quarry node inventory.

use thiserror::Error;

/// Result type alias for inventory operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during inventory operations.
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

    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node already exists: {0}")]
    AlreadyExists(String),

    #[error("illegal state transition for {hostname}: {from} -> {to}")]
    InvalidTransition { hostname: String, from: String, to: String },

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("timed out waiting for {0} lock")]
    LockTimeout(String),
}
