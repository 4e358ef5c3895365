//! The manifest bundle resource.
//!
//! A [`ManifestBundle`] is the unit the work builder produces and the
//! protocol carries: an ordered list of manifests targeted at one cluster,
//! plus the options shared by every manifest in it. Agents report back a
//! [`BundleStatus`] with per-manifest conditions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::hash_serializable;
use crate::error::Result;
use crate::event_type::DataType;
use crate::meta::ObjectMeta;
use crate::resource::ResourceObject;
use crate::types::ContentHash;

/// Default API group for bundles.
pub const BUNDLE_GROUP: &str = "io.example.works";
/// Default API version for bundles.
pub const BUNDLE_VERSION: &str = "v1alpha1";
/// Plural resource name for bundles.
pub const BUNDLE_RESOURCE: &str = "manifestbundles";

/// The data type bundles are published under.
pub fn bundle_data_type() -> DataType {
    DataType::new(BUNDLE_GROUP, BUNDLE_VERSION, BUNDLE_RESOURCE)
}

/// A bundle of manifests targeted at one cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestBundle {
    pub metadata: ObjectMeta,
    /// Stable position within the collection this bundle was cut from.
    #[serde(default)]
    pub ordinal: u64,
    pub spec: BundleSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BundleStatus>,
}

impl ManifestBundle {
    pub fn new(metadata: ObjectMeta, spec: BundleSpec) -> Self {
        Self {
            metadata,
            ordinal: 0,
            spec,
            status: None,
        }
    }
}

impl ResourceObject for ManifestBundle {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn status_hash(&self) -> Result<ContentHash> {
        hash_serializable(&self.status)
    }
}

/// Desired state of a bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    #[serde(default)]
    pub manifests: Vec<Manifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_option: Option<DeleteOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifest_configs: Vec<ManifestConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<Executor>,
}

/// One opaque JSON object to apply on the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(pub Value);

impl Manifest {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Serialized length in bytes, the measure the work builder packs by.
    pub fn size(&self) -> usize {
        serde_json::to_vec(&self.0).map(|v| v.len()).unwrap_or(0)
    }

    /// Identify the object this manifest describes.
    pub fn identifier(&self) -> ManifestIdentifier {
        let text = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or_default().to_string();
        let api_version = text(self.0.get("apiVersion"));
        let (group, version) = match api_version.rsplit_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version),
        };
        let metadata = self.0.get("metadata");
        ManifestIdentifier {
            group,
            version,
            kind: text(self.0.get("kind")),
            namespace: text(metadata.and_then(|m| m.get("namespace"))),
            name: text(metadata.and_then(|m| m.get("name"))),
        }
    }
}

/// Identity of an object described by a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestIdentifier {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

/// How applied objects are treated when the bundle goes away.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOption {
    pub propagation_policy: PropagationPolicy,
    /// Objects left behind under [`PropagationPolicy::SelectivelyOrphan`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectively_orphan: Vec<ManifestIdentifier>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationPolicy {
    #[default]
    Foreground,
    Orphan,
    SelectivelyOrphan,
}

/// Per-manifest apply configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestConfig {
    pub resource_identifier: ManifestIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<UpdateStrategy>,
    /// JSON paths reported back in status.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback_rules: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStrategy {
    #[default]
    Update,
    CreateOnly,
    ServerSideApply,
    ReadOnly,
}

/// Identity the agent applies manifests as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Executor {
    pub service_account: ServiceAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub namespace: String,
    pub name: String,
}

/// Observed state reported by an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub resource_status: Vec<ManifestCondition>,
}

/// Conditions for one manifest of the bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCondition {
    pub resource_meta: ManifestIdentifier,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A status condition. No timestamps, so equal observations hash equally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: i64,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: String::new(),
            message: String::new(),
            observed_generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}
