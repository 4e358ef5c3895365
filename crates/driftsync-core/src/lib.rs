//! # Driftsync Core
//!
//! Wire primitives for driftsync: event types, envelopes, codecs and
//! content hashing.
//!
//! This crate does no I/O. It defines what travels between a source and its
//! agents and how domain resources are translated to and from it.
//!
//! ## Key Types
//!
//! - [`EventType`] - `<group>.<version>.<resource>.<subResource>.<action>`
//! - [`Envelope`] - A typed event with extension attributes and a payload
//! - [`Codec`] / [`CodecRegistry`] - Resource ⇄ envelope translation per data type
//! - [`ResourceObject`] - What the protocol clients need from a resource
//! - [`ManifestBundle`] - The bundled-manifests resource
//!
//! ## Hashing
//!
//! Status and desired-state hashes are Blake3 over canonical CBOR, so key
//! order in a JSON document never changes its hash. See [`canonical`].

pub mod bundle;
pub mod bundle_codec;
pub mod canonical;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod event_type;
pub mod meta;
pub mod resource;
pub mod types;

pub use bundle::{
    bundle_data_type, BundleSpec, BundleStatus, Condition, ConditionStatus, DeleteOption,
    Executor, Manifest, ManifestBundle, ManifestCondition, ManifestConfig, ManifestIdentifier,
    PropagationPolicy, ServiceAccount, UpdateStrategy,
};
pub use bundle_codec::ManifestBundleCodec;
pub use canonical::{canonical_bytes, content_hash, hash_serializable};
pub use codec::{deletion_envelope, Codec, CodecRegistry};
pub use envelope::{keys, AttributeValue, Envelope, Payload};
pub use error::{CoreError, Result};
pub use event_type::{DataType, EventAction, EventType, SubResource};
pub use meta::{ObjectMeta, ResourceMeta};
pub use resource::ResourceObject;
pub use types::ContentHash;

/// Current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
