//! Codecs translate between domain resources and envelopes.
//!
//! Each [`Codec`] handles exactly one [`DataType`]. A [`CodecRegistry`]
//! holds one codec per data type and routes by the parsed event type, so a
//! client can carry several resource kinds over one transport.

use std::collections::HashMap;
use std::sync::Arc;

use crate::envelope::{keys, AttributeValue, Envelope, Payload};
use crate::error::{CoreError, Result};
use crate::event_type::{DataType, EventType};

/// Bidirectional translation for one data type.
pub trait Codec<R>: Send + Sync {
    /// The data type this codec handles.
    fn data_type(&self) -> &DataType;

    /// Encode a resource for the given event type.
    ///
    /// Must fail with [`CoreError::UnsupportedDataType`] if the event type's
    /// data type is not this codec's.
    fn encode(&self, source: &str, event_type: &EventType, resource: &R) -> Result<Envelope>;

    /// Decode an envelope into a resource.
    fn decode(&self, envelope: &Envelope) -> Result<R>;
}

/// One codec per data type.
pub struct CodecRegistry<R> {
    codecs: HashMap<DataType, Arc<dyn Codec<R>>>,
}

impl<R> CodecRegistry<R> {
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register a codec. Registering a second codec for a data type fails.
    pub fn register(&mut self, codec: Arc<dyn Codec<R>>) -> Result<()> {
        let data_type = codec.data_type().clone();
        if self.codecs.contains_key(&data_type) {
            return Err(CoreError::DuplicateCodec(data_type));
        }
        tracing::debug!(data_type = %data_type, "registered codec");
        self.codecs.insert(data_type, codec);
        Ok(())
    }

    /// Builder-style [`Self::register`].
    pub fn with(mut self, codec: Arc<dyn Codec<R>>) -> Result<Self> {
        self.register(codec)?;
        Ok(self)
    }

    pub fn get(&self, data_type: &DataType) -> Option<&Arc<dyn Codec<R>>> {
        self.codecs.get(data_type)
    }

    pub fn contains(&self, data_type: &DataType) -> bool {
        self.codecs.contains_key(data_type)
    }

    /// Registered data types, in no particular order.
    pub fn data_types(&self) -> impl Iterator<Item = &DataType> {
        self.codecs.keys()
    }

    pub fn encode(&self, source: &str, event_type: &EventType, resource: &R) -> Result<Envelope> {
        self.get(&event_type.data_type)
            .ok_or_else(|| CoreError::UnsupportedDataType(event_type.data_type.clone()))?
            .encode(source, event_type, resource)
    }

    /// Parse the envelope's type and decode with the matching codec.
    pub fn decode(&self, envelope: &Envelope) -> Result<R> {
        let event_type = envelope.parsed_type()?;
        self.get(&event_type.data_type)
            .ok_or(CoreError::UnsupportedDataType(event_type.data_type))?
            .decode(envelope)
    }
}

impl<R> Default for CodecRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity attributes shared by every resource event.
pub fn identity_attributes(
    envelope: &mut Envelope,
    resource_id: &str,
    resource_version: i64,
    cluster_name: &str,
) {
    envelope.set_attribute(keys::RESOURCE_ID, resource_id);
    envelope.set_attribute(keys::RESOURCE_VERSION, resource_version);
    envelope.set_attribute(keys::CLUSTER_NAME, cluster_name);
}

/// An envelope announcing that a resource was deleted.
///
/// Carries only identity attributes and the deletion time, which is all a
/// receiver needs to drop the resource. Used when no resource value exists
/// to hand a codec, e.g. when a resync finds a resource gone locally.
pub fn deletion_envelope(
    event_type: &EventType,
    source: &str,
    resource_id: &str,
    resource_version: i64,
    cluster_name: &str,
    deleted_at: i64,
) -> Result<Envelope> {
    let mut envelope = Envelope::new(event_type, source)?;
    identity_attributes(&mut envelope, resource_id, resource_version, cluster_name);
    envelope.set_attribute(keys::DELETION_TIMESTAMP, AttributeValue::Time(deleted_at));
    Ok(envelope.payload(Payload::Deletion { deleted_at }))
}

/// Deletion time from either the payload or the deletion attribute.
pub fn deletion_time(envelope: &Envelope) -> Option<i64> {
    envelope.deletion_timestamp().or_else(|| {
        envelope
            .get(keys::DELETION_TIMESTAMP)
            .and_then(AttributeValue::as_time)
    })
}
