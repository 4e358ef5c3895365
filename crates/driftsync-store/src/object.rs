//! Stored objects and their keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use driftsync_core::{now_millis, Manifest, ManifestIdentifier, ObjectMeta};

use crate::error::{Result, StoreError};
use crate::patch;

/// Identity of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(
        api_version: &str,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let (group, version) = split_api_version(api_version);
        Self {
            group,
            version,
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)?;
        if !self.namespace.is_empty() {
            write!(f, "/{}", self.namespace)?;
        }
        write!(f, "/{}", self.name)
    }
}

impl From<&ManifestIdentifier> for ObjectKey {
    fn from(id: &ManifestIdentifier) -> Self {
        Self {
            group: id.group.clone(),
            version: id.version.clone(),
            kind: id.kind.clone(),
            namespace: id.namespace.clone(),
            name: id.name.clone(),
        }
    }
}

fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// A stored object: type header, metadata, and everything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// `spec`, `data`, `status` and any other top-level fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Object {
    /// Parse a manifest into an object.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        let object: Object = serde_json::from_value(manifest.0.clone())?;
        if object.kind.is_empty() || object.metadata.name.is_empty() {
            return Err(StoreError::InvalidData(
                "manifest needs kind and metadata.name".into(),
            ));
        }
        Ok(object)
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(
            &self.api_version,
            self.kind.clone(),
            self.metadata.namespace.clone(),
            self.metadata.name.clone(),
        )
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Top-level fields other than `status`.
    pub fn spec_fields(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(k, _)| k.as_str() != "status")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Stamp server-populated metadata on a newly created object.
pub(crate) fn stamp_created(object: &mut Object, version: u64) {
    object.metadata.uid = new_uid();
    object.metadata.resource_version = version.to_string();
    object.metadata.generation = 1;
    object.metadata.creation_timestamp = Some(now_millis());
}

/// Apply a merge patch to a stored object.
///
/// Identity and server-populated metadata survive the patch. Returns `None`
/// when the patch changes nothing.
pub(crate) fn patched(current: &Object, merge_patch: &Value) -> Result<Option<Object>> {
    let mut doc = current.to_value()?;
    patch::apply(&mut doc, merge_patch);
    let mut next: Object = serde_json::from_value(doc)?;

    next.api_version = current.api_version.clone();
    next.kind = current.kind.clone();
    next.metadata.name = current.metadata.name.clone();
    next.metadata.namespace = current.metadata.namespace.clone();
    next.metadata.uid = current.metadata.uid.clone();
    next.metadata.resource_version = current.metadata.resource_version.clone();
    next.metadata.creation_timestamp = current.metadata.creation_timestamp;
    next.metadata.generation = current.metadata.generation;

    if next == *current {
        return Ok(None);
    }
    if next.spec_fields() != current.spec_fields() {
        next.metadata.generation += 1;
    }
    Ok(Some(next))
}

/// Fail with `Conflict` unless the stored version matches the expected one.
pub(crate) fn check_version(key: &ObjectKey, current: &Object, expected: Option<&str>) -> Result<()> {
    match expected {
        Some(expected) if expected != current.metadata.resource_version => {
            Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected.to_string(),
                actual: current.metadata.resource_version.clone(),
            })
        }
        _ => Ok(()),
    }
}

fn new_uid() -> String {
    use rand::Rng;
    hex::encode(rand::thread_rng().gen::<[u8; 16]>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_map() -> Object {
        Object::from_manifest(&Manifest::new(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"namespace": "default", "name": "cm"},
            "data": {"a": "1"}
        })))
        .unwrap()
    }

    #[test]
    fn test_from_manifest_flattens_fields() {
        let obj = config_map();
        assert_eq!(obj.kind, "ConfigMap");
        assert_eq!(obj.fields["data"], json!({"a": "1"}));
        assert_eq!(obj.key().to_string(), "v1/ConfigMap/default/cm");
    }

    #[test]
    fn test_from_manifest_requires_name() {
        let m = Manifest::new(json!({"apiVersion": "v1", "kind": "ConfigMap"}));
        assert!(matches!(Object::from_manifest(&m), Err(StoreError::InvalidData(_))));
    }

    #[test]
    fn test_key_api_version() {
        let key = ObjectKey::new("apps/v1", "Deployment", "ns", "web");
        assert_eq!(key.group, "apps");
        assert_eq!(key.api_version(), "apps/v1");
    }

    #[test]
    fn test_patched_keeps_identity() {
        let mut current = config_map();
        stamp_created(&mut current, 1);
        let next = patched(
            &current,
            &json!({"data": {"a": "2"}, "metadata": {"uid": "forged", "labels": {"x": "y"}}}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(next.metadata.uid, current.metadata.uid);
        assert_eq!(next.metadata.labels["x"], "y");
        assert_eq!(next.fields["data"]["a"], "2");
        assert_eq!(next.metadata.generation, 2);
    }

    #[test]
    fn test_patched_noop() {
        let current = config_map();
        assert!(patched(&current, &json!({"data": {"a": "1"}})).unwrap().is_none());
    }

    #[test]
    fn test_check_version() {
        let mut obj = config_map();
        obj.metadata.resource_version = "5".into();
        let key = obj.key();
        assert!(check_version(&key, &obj, None).is_ok());
        assert!(check_version(&key, &obj, Some("5")).is_ok());
        assert!(matches!(
            check_version(&key, &obj, Some("4")),
            Err(StoreError::Conflict { .. })
        ));
    }
}
