//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Object serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Object not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// An object with this key already exists.
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    /// The object changed since the caller read it; re-fetch and retry.
    #[error("conflict on {key}: expected resource version {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: String,
        actual: String,
    },

    /// Invalid data in storage or in a request.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
