//! Self-describing transport events.
//!
//! An [`Envelope`] is what crosses the transport: a raw type string, the
//! publisher's source id, a string-keyed attribute map and a payload.
//! Deletion is a payload variant rather than a separate message kind, so a
//! delete stays ordered behind earlier updates to the same resource.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::event_type::EventType;

/// Reserved extension attribute keys.
pub mod keys {
    pub const RESOURCE_ID: &str = "resourceid";
    pub const RESOURCE_VERSION: &str = "resourceversion";
    pub const CLUSTER_NAME: &str = "clustername";
    pub const DELETION_TIMESTAMP: &str = "deletiontimestamp";
    pub const RESOURCE_META: &str = "resourcemeta";
    pub const ORIGINAL_SOURCE: &str = "originalsource";
    /// Per-resource status sequence stamped by agents.
    pub const SEQUENCE_ID: &str = "sequenceid";
}

/// A transport-native attribute scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    Text(String),
    Int(i64),
    Bool(bool),
    /// Unix milliseconds.
    Time(i64),
}

impl AttributeValue {
    /// Coerce to a string.
    pub fn as_text(&self) -> String {
        match self {
            AttributeValue::Text(s) => s.clone(),
            AttributeValue::Int(i) | AttributeValue::Time(i) => i.to_string(),
            AttributeValue::Bool(b) => b.to_string(),
        }
    }

    /// Coerce to an integer; text must be base-10.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) | AttributeValue::Time(i) => Some(*i),
            AttributeValue::Text(s) => s.trim().parse().ok(),
            AttributeValue::Bool(_) => None,
        }
    }

    /// Coerce to a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            AttributeValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Coerce to Unix milliseconds.
    pub fn as_time(&self) -> Option<i64> {
        self.as_int()
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Int(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Payload {
    /// No body.
    #[default]
    Empty,
    /// Encoded resource or fingerprint body.
    Data(Bytes),
    /// The resource was deleted at the given Unix milliseconds.
    Deletion { deleted_at: i64 },
}

/// A wire event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique event id.
    pub id: String,
    /// Dot-delimited event type; parsed lazily so bad input reaches the decoder.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Publisher identity.
    pub source: String,
    /// Extension attributes.
    pub attributes: BTreeMap<String, AttributeValue>,
    pub payload: Payload,
}

impl Envelope {
    /// Start an envelope for a structured event type.
    pub fn new(event_type: &EventType, source: impl Into<String>) -> Result<Self> {
        Ok(Self::with_raw_type(event_type.format()?, source))
    }

    /// Start an envelope with an unchecked type string.
    pub fn with_raw_type(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: new_event_id(),
            event_type: event_type.into(),
            source: source.into(),
            attributes: BTreeMap::new(),
            payload: Payload::Empty,
        }
    }

    /// Parse the type string.
    pub fn parsed_type(&self) -> Result<EventType> {
        EventType::parse(&self.event_type)
    }

    /// Builder-style attribute setter.
    pub fn attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Required string attribute.
    pub fn require_text(&self, key: &'static str) -> Result<String> {
        match self.attributes.get(key) {
            Some(v) => {
                let s = v.as_text();
                if s.is_empty() {
                    Err(CoreError::MissingAttribute(key))
                } else {
                    Ok(s)
                }
            }
            None => Err(CoreError::MissingAttribute(key)),
        }
    }

    /// Required integer attribute.
    pub fn require_int(&self, key: &'static str) -> Result<i64> {
        let value = self
            .attributes
            .get(key)
            .ok_or(CoreError::MissingAttribute(key))?;
        value
            .as_int()
            .ok_or_else(|| CoreError::InvalidResourceVersion(value.as_text()))
    }

    /// Builder-style payload setter.
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Raw data bytes, if this is a data payload.
    pub fn data(&self) -> Option<&Bytes> {
        match &self.payload {
            Payload::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Deletion time, if this event signals a deletion.
    pub fn deletion_timestamp(&self) -> Option<i64> {
        match self.payload {
            Payload::Deletion { deleted_at } => Some(deleted_at),
            _ => None,
        }
    }

    /// The resource id attribute, if present.
    pub fn resource_id(&self) -> Option<String> {
        self.attributes.get(keys::RESOURCE_ID).map(|v| v.as_text())
    }

    /// The cluster name attribute, if present and non-empty.
    pub fn cluster_name(&self) -> Option<String> {
        self.attributes
            .get(keys::CLUSTER_NAME)
            .map(|v| v.as_text())
            .filter(|s| !s.is_empty())
    }
}

fn new_event_id() -> String {
    use rand::Rng;
    hex::encode(rand::thread_rng().gen::<[u8; 16]>())
}
