//! Error types for the sync module.

use thiserror::Error;

use driftsync_core::CoreError;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Event type, attribute or codec failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The transport is disconnected; the operation may be retried later.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The transport is gone for good.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// The local resource lister failed.
    #[error("lister error: {0}")]
    Lister(String),

    /// A fingerprint payload could not be encoded or decoded.
    #[error("invalid resync payload: {0}")]
    InvalidResyncPayload(String),

    /// Timeout waiting for a response.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
