//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::object::{check_version, patched, stamp_created, Object, ObjectKey};
use crate::traits::Store;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    /// Objects indexed by key.
    objects: BTreeMap<ObjectKey, Object>,

    /// Last resource version handed out.
    version: u64,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                objects: BTreeMap::new(),
                version: 0,
            }),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Object> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn create(&self, object: &Object) -> Result<Object> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let key = object.key();
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        inner.version += 1;
        let mut stored = object.clone();
        stamp_created(&mut stored, inner.version);
        inner.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        merge_patch: &Value,
        expected_version: Option<&str>,
    ) -> Result<Object> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let current = inner
            .objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        check_version(key, current, expected_version)?;

        let Some(mut next) = patched(current, merge_patch)? else {
            return Ok(current.clone());
        };
        inner.version += 1;
        next.metadata.resource_version = inner.version.to_string();
        inner.objects.insert(key.clone(), next.clone());
        Ok(next)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Object>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .objects
            .values()
            .filter(|o| namespace.map_or(true, |ns| o.metadata.namespace == ns))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use driftsync_core::Manifest;
    use serde_json::json;

    fn config_map(ns: &str, name: &str) -> Object {
        Object::from_manifest(&Manifest::new(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"namespace": ns, "name": name},
            "data": {"k": "v"}
        })))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("ns", "a")).await.unwrap();
        assert!(!created.metadata.uid.is_empty());
        assert_eq!(created.metadata.resource_version, "1");

        let fetched = store.get(&created.key()).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let store = MemoryStore::new();
        store.create(&config_map("ns", "a")).await.unwrap();
        let err = store.create(&config_map("ns", "a")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        let err = store.get(&config_map("ns", "a").key()).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get_opt(&config_map("ns", "a").key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_patch_bumps_version() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("ns", "a")).await.unwrap();
        let key = created.key();

        let patched = store
            .patch(&key, &json!({"data": {"k": "w"}}), Some("1"))
            .await
            .unwrap();
        assert_eq!(patched.metadata.resource_version, "2");
        assert_eq!(patched.fields["data"]["k"], "w");

        let noop = store.patch(&key, &json!({"data": {"k": "w"}}), None).await.unwrap();
        assert_eq!(noop.metadata.resource_version, "2");
    }

    #[tokio::test]
    async fn test_patch_conflict() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("ns", "a")).await.unwrap();
        let err = store
            .patch(&created.key(), &json!({"data": {"k": "w"}}), Some("7"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = MemoryStore::new();
        store.create(&config_map("ns1", "a")).await.unwrap();
        store.create(&config_map("ns1", "b")).await.unwrap();
        store.create(&config_map("ns2", "c")).await.unwrap();

        assert_eq!(store.list(None).await.unwrap().len(), 3);
        assert_eq!(store.list(Some("ns1")).await.unwrap().len(), 2);

        store.delete(&config_map("ns1", "a").key()).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(!store.delete_if_exists(&config_map("ns1", "a").key()).await.unwrap());
    }
}
