//! Error types for driftsync core.

use thiserror::Error;

use crate::event_type::DataType;

/// Errors raised while formatting, parsing, encoding or decoding events.
///
/// Every variant is independently matchable so callers can tell a
/// malformed type string from a missing attribute or a bad payload.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The event type string does not have the expected shape.
    #[error("malformed event type: {0}")]
    MalformedType(String),

    /// The sub-resource segment is neither `spec` nor `status`.
    #[error("unsupported sub-resource: {0}")]
    UnsupportedSubResource(String),

    /// The event's data type is not handled by the codec (or registry).
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(DataType),

    /// A required extension attribute is absent.
    #[error("missing attribute: {0}")]
    MissingAttribute(&'static str),

    /// The resource version is not a base-10 integer.
    #[error("invalid resource version: {0:?}")]
    InvalidResourceVersion(String),

    /// The payload (or a structured attribute) could not be decoded.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A codec for this data type is already registered.
    #[error("codec already registered for {0}")]
    DuplicateCodec(DataType),

    /// Serializing an outbound payload failed.
    #[error("encoding error: {0}")]
    EncodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
