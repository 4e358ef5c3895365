//! Resource metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// Object metadata shared by every resource kind.
///
/// `resource_version` is a string on the object (as the durable store hands
/// it out) but must parse as a base-10 integer before it can go on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<i64>,
    /// Unix milliseconds; set once deletion has been requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<i64>,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl ObjectMeta {
    /// Metadata for a named, namespaced object.
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Parse `resource_version` as a base-10 integer.
    pub fn version_number(&self) -> Result<i64> {
        self.resource_version
            .parse::<i64>()
            .map_err(|_| CoreError::InvalidResourceVersion(self.resource_version.clone()))
    }
}

/// Transport-independent identity of a domain resource instance.
///
/// Carried JSON-encoded in the `resourcemeta` attribute of spec events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMeta {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
    /// Stable position within a manifest collection.
    #[serde(default)]
    pub ordinal: u64,
}

impl ResourceMeta {
    /// Attribute encoding.
    pub fn to_attribute(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    /// Attribute decoding.
    pub fn from_attribute(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| CoreError::InvalidPayload(format!("resourcemeta: {e}")))
    }
}
