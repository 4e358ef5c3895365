//! Error types for the work module.

use thiserror::Error;

use driftsync_core::CoreError;
use driftsync_store::StoreError;

/// Errors from building or applying work.
#[derive(Debug, Error)]
pub enum WorkError {
    /// Core encoding or hashing error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Durable store error, passed through unmodified.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A work builder setting is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WorkError {
    /// True if this is a store `Conflict`.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WorkError::Store(e) if e.is_conflict())
    }
}

/// Result type for work operations.
pub type Result<T> = std::result::Result<T, WorkError>;
