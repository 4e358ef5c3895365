//! Error types for driftsync.

use driftsync_core::CoreError;
use driftsync_store::StoreError;
use driftsync_sync::SyncError;
use driftsync_work::WorkError;
use thiserror::Error;

/// Errors from the assembled source and agent components.
#[derive(Debug, Error)]
pub enum DriftError {
    /// Event type, codec or resource error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync protocol or transport error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Work building or apply error.
    #[error("work error: {0}")]
    Work(#[from] WorkError),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for driftsync operations.
pub type Result<T> = std::result::Result<T, DriftError>;
