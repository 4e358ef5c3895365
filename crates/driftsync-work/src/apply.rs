//! Write-avoiding apply of desired objects to a durable store.
//!
//! The cache remembers, per object key, the hash of the last desired state
//! it successfully wrote. An apply is skipped when that hash matches and the
//! stored object still agrees with the desired one on everything the caller
//! controls: type header, labels, annotations and every top-level field
//! except `status`. Server-populated metadata never counts as a difference.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

use driftsync_core::{content_hash, ContentHash};
use driftsync_store::{patch, Object, ObjectKey, Store, StoreError, StoreExt};

use crate::config::ApplyCacheConfig;
use crate::error::Result;

/// What an apply did.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The object did not exist and was created.
    Created(Object),
    /// The object was patched to the desired state.
    Patched(Object),
    /// Nothing to write; the stored object as read.
    Skipped(Object),
    /// Creation raced with another writer; treated as success.
    AlreadyExists,
}

impl ApplyOutcome {
    /// True if the store was written.
    pub fn wrote(&self) -> bool {
        matches!(self, ApplyOutcome::Created(_) | ApplyOutcome::Patched(_))
    }
}

/// Apply cache over a [`Store`].
///
/// Applies to the same key are serialized; different keys proceed in
/// parallel.
pub struct ApplyCache {
    store: Arc<dyn Store>,
    config: ApplyCacheConfig,
    written: Mutex<HashMap<ObjectKey, ContentHash>>,
    locks: Mutex<HashMap<ObjectKey, Arc<AsyncMutex<()>>>>,
}

impl ApplyCache {
    pub fn new(store: Arc<dyn Store>, config: ApplyCacheConfig) -> Self {
        Self {
            store,
            config,
            written: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Hash of the last desired state written for `key`.
    pub fn recorded_hash(&self, key: &ObjectKey) -> Option<ContentHash> {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
    }

    /// Drop what the cache knows about `key`.
    pub fn forget(&self, key: &ObjectKey) {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// True if writing `desired` over `existing` would change nothing the
    /// caller controls and the cache last wrote exactly this desired state.
    pub fn safe_to_skip(&self, desired: &Object, existing: &Object) -> bool {
        projection(desired) == projection(existing)
            && self.recorded_hash(&desired.key()) == Some(desired_hash(desired))
    }

    /// Bring the stored object for `desired.key()` to the desired state.
    ///
    /// Creates when absent, skips when [`Self::safe_to_skip`] holds, and
    /// otherwise sends a minimal merge patch guarded by the read version.
    /// A `Conflict` is retried with a fresh read up to
    /// `max_conflict_retries` times. Failures leave the cache untouched.
    pub async fn apply(&self, desired: &Object) -> Result<ApplyOutcome> {
        let key = desired.key();
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let hash = desired_hash(desired);
        let mut conflicts = 0u32;

        loop {
            let Some(existing) = self.store.get_opt(&key).await? else {
                return match self.store.create(desired).await {
                    Ok(created) => {
                        tracing::debug!(key = %key, manager = %self.config.field_manager, "created");
                        self.record(&key, hash);
                        Ok(ApplyOutcome::Created(created))
                    }
                    Err(StoreError::AlreadyExists(_)) => {
                        tracing::debug!(key = %key, "already exists, treating create as done");
                        self.record(&key, hash);
                        Ok(ApplyOutcome::AlreadyExists)
                    }
                    Err(e) => Err(e.into()),
                };
            };

            if self.safe_to_skip(desired, &existing) {
                tracing::trace!(key = %key, "unchanged since last apply, skipping");
                return Ok(ApplyOutcome::Skipped(existing));
            }

            let merge_patch = patch::diff(&existing.to_value()?, &target(desired, &existing).to_value()?);
            if patch::is_empty(&merge_patch) {
                tracing::debug!(key = %key, "stored object already matches");
                self.record(&key, hash);
                return Ok(ApplyOutcome::Skipped(existing));
            }

            match self
                .store
                .patch(&key, &merge_patch, Some(&existing.metadata.resource_version))
                .await
            {
                Ok(patched) => {
                    tracing::debug!(
                        key = %key,
                        manager = %self.config.field_manager,
                        resource_version = %patched.metadata.resource_version,
                        "patched"
                    );
                    self.record(&key, hash);
                    return Ok(ApplyOutcome::Patched(patched));
                }
                Err(e @ StoreError::Conflict { .. }) => {
                    if conflicts >= self.config.max_conflict_retries {
                        tracing::warn!(key = %key, attempts = conflicts + 1, "giving up after conflicts");
                        return Err(e.into());
                    }
                    conflicts += 1;
                    tracing::debug!(key = %key, attempt = conflicts, error = %e, "conflict, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Delete the stored object and forget it. Returns false if it was
    /// already gone.
    ///
    /// The key's lock is kept: applies queued behind the delete and applies
    /// arriving after it must still take turns.
    pub async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        let deleted = self.store.delete_if_exists(key).await?;
        self.forget(key);
        tracing::debug!(key = %key, deleted, "delete");
        Ok(deleted)
    }

    fn lock_for(&self, key: &ObjectKey) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn record(&self, key: &ObjectKey, hash: ContentHash) {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), hash);
    }
}

/// Hash of the caller-controlled part of an object.
pub fn desired_hash(object: &Object) -> ContentHash {
    content_hash(&projection(object))
}

fn projection(object: &Object) -> Value {
    json!({
        "apiVersion": object.api_version,
        "kind": object.kind,
        "labels": object.metadata.labels,
        "annotations": object.metadata.annotations,
        "fields": object.spec_fields(),
    })
}

/// `existing` with every caller-controlled part replaced by `desired`.
fn target(desired: &Object, existing: &Object) -> Object {
    let mut target = existing.clone();
    target.metadata.labels = desired.metadata.labels.clone();
    target.metadata.annotations = desired.metadata.annotations.clone();
    target.fields = desired.spec_fields();
    if let Some(status) = existing.fields.get("status") {
        target.fields.insert("status".into(), status.clone());
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use driftsync_core::Manifest;
    use driftsync_store::MemoryStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Counts writes and injects failures in front of a [`MemoryStore`].
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        creates: AtomicUsize,
        patches: AtomicUsize,
        conflicts_to_inject: AtomicUsize,
        hide_next_get: AtomicBool,
        fail_writes: AtomicBool,
        slow_reads: AtomicBool,
        reads_in_flight: AtomicUsize,
        max_reads_in_flight: AtomicUsize,
        hold_deletes: AtomicBool,
        delete_started: Notify,
        release_delete: Notify,
    }

    impl CountingStore {
        fn writes(&self) -> usize {
            self.creates.load(Ordering::SeqCst) + self.patches.load(Ordering::SeqCst)
        }

        fn injected_failure(&self) -> Option<StoreError> {
            self.fail_writes
                .load(Ordering::SeqCst)
                .then(|| StoreError::InvalidData("injected".into()))
        }
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn get(&self, key: &ObjectKey) -> driftsync_store::Result<Object> {
            if self.hide_next_get.swap(false, Ordering::SeqCst) {
                return Err(StoreError::NotFound(key.to_string()));
            }
            if self.slow_reads.load(Ordering::SeqCst) {
                let now = self.reads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_reads_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                self.reads_in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            self.inner.get(key).await
        }

        async fn create(&self, object: &Object) -> driftsync_store::Result<Object> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.injected_failure() {
                return Err(e);
            }
            self.inner.create(object).await
        }

        async fn patch(
            &self,
            key: &ObjectKey,
            merge_patch: &Value,
            expected_version: Option<&str>,
        ) -> driftsync_store::Result<Object> {
            self.patches.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.injected_failure() {
                return Err(e);
            }
            let pending = self.conflicts_to_inject.load(Ordering::SeqCst);
            if pending > 0 {
                self.conflicts_to_inject.store(pending - 1, Ordering::SeqCst);
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                    expected: expected_version.unwrap_or_default().to_string(),
                    actual: "newer".into(),
                });
            }
            self.inner.patch(key, merge_patch, expected_version).await
        }

        async fn delete(&self, key: &ObjectKey) -> driftsync_store::Result<()> {
            if self.hold_deletes.swap(false, Ordering::SeqCst) {
                self.delete_started.notify_one();
                self.release_delete.notified().await;
            }
            self.inner.delete(key).await
        }

        async fn list(&self, namespace: Option<&str>) -> driftsync_store::Result<Vec<Object>> {
            self.inner.list(namespace).await
        }
    }

    fn config_map(data: Value) -> Object {
        Object::from_manifest(&Manifest::new(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"namespace": "default", "name": "settings", "labels": {"app": "web"}},
            "data": data,
        })))
        .unwrap()
    }

    fn cache() -> (Arc<CountingStore>, ApplyCache) {
        let store = Arc::new(CountingStore::default());
        let cache = ApplyCache::new(store.clone(), ApplyCacheConfig::default());
        (store, cache)
    }

    #[tokio::test]
    async fn test_identical_applies_write_once() {
        let (store, cache) = cache();
        let desired = config_map(json!({"a": "1"}));

        assert!(matches!(cache.apply(&desired).await.unwrap(), ApplyOutcome::Created(_)));
        assert!(matches!(cache.apply(&desired).await.unwrap(), ApplyOutcome::Skipped(_)));
        assert_eq!(store.writes(), 1);

        let mut annotated = desired.clone();
        annotated.metadata.annotations.insert("owner".into(), "ops".into());
        let stored = match cache.apply(&annotated).await.unwrap() {
            ApplyOutcome::Patched(stored) => stored,
            other => panic!("expected a patch, got {other:?}"),
        };
        assert_eq!(stored.metadata.annotations["owner"], "ops");
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
        assert_eq!(store.patches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_metadata_is_not_a_difference() {
        let (store, cache) = cache();
        let desired = config_map(json!({"a": "1"}));
        let ApplyOutcome::Created(created) = cache.apply(&desired).await.unwrap() else {
            panic!("expected create");
        };
        assert!(!created.metadata.uid.is_empty());
        assert!(cache.safe_to_skip(&desired, &created));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_fresh_cache_reads_instead_of_writing() {
        let (store, cache) = cache();
        let desired = config_map(json!({"a": "1"}));
        cache.apply(&desired).await.unwrap();

        let restarted = ApplyCache::new(store.clone(), ApplyCacheConfig::default());
        assert!(matches!(restarted.apply(&desired).await.unwrap(), ApplyOutcome::Skipped(_)));
        assert_eq!(restarted.recorded_hash(&desired.key()), Some(desired_hash(&desired)));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_removed_field_is_removed() {
        let (store, cache) = cache();
        let mut desired = config_map(json!({"a": "1", "b": "2"}));
        desired.fields.insert("binaryData".into(), json!({"x": "AA=="}));
        cache.apply(&desired).await.unwrap();

        let slim = config_map(json!({"a": "1"}));
        cache.apply(&slim).await.unwrap();
        let stored = store.get(&slim.key()).await.unwrap();
        assert_eq!(stored.fields["data"], json!({"a": "1"}));
        assert!(!stored.fields.contains_key("binaryData"));
    }

    #[tokio::test]
    async fn test_status_survives_apply() {
        let (store, cache) = cache();
        let desired = config_map(json!({"a": "1"}));
        cache.apply(&desired).await.unwrap();
        store
            .inner
            .patch(&desired.key(), &json!({"status": {"ready": true}}), None)
            .await
            .unwrap();

        // Status alone does not trigger a write.
        assert!(matches!(cache.apply(&desired).await.unwrap(), ApplyOutcome::Skipped(_)));

        let changed = config_map(json!({"a": "2"}));
        cache.apply(&changed).await.unwrap();
        let stored = store.get(&desired.key()).await.unwrap();
        assert_eq!(stored.fields["status"], json!({"ready": true}));
        assert_eq!(stored.fields["data"], json!({"a": "2"}));
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let (store, cache) = cache();
        cache.apply(&config_map(json!({"a": "1"}))).await.unwrap();
        store.conflicts_to_inject.store(2, Ordering::SeqCst);

        let outcome = cache.apply(&config_map(json!({"a": "2"}))).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Patched(_)));
        assert_eq!(store.patches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_conflict_exhaustion_surfaces() {
        let (store, cache) = cache();
        let first = config_map(json!({"a": "1"}));
        cache.apply(&first).await.unwrap();
        store.conflicts_to_inject.store(10, Ordering::SeqCst);

        let err = cache.apply(&config_map(json!({"a": "2"}))).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.patches.load(Ordering::SeqCst), 4);
        assert_eq!(cache.recorded_hash(&first.key()), Some(desired_hash(&first)));
    }

    #[tokio::test]
    async fn test_already_exists_counts_as_success() {
        let (store, cache) = cache();
        let desired = config_map(json!({"a": "1"}));
        store.inner.create(&desired).await.unwrap();
        store.hide_next_get.store(true, Ordering::SeqCst);

        assert_eq!(cache.apply(&desired).await.unwrap(), ApplyOutcome::AlreadyExists);
        assert_eq!(cache.recorded_hash(&desired.key()), Some(desired_hash(&desired)));
    }

    #[tokio::test]
    async fn test_failed_write_is_not_recorded() {
        let (store, cache) = cache();
        let desired = config_map(json!({"a": "1"}));
        store.fail_writes.store(true, Ordering::SeqCst);

        let err = cache.apply(&desired).await.unwrap_err();
        assert!(matches!(err, crate::WorkError::Store(StoreError::InvalidData(_))));
        assert_eq!(cache.recorded_hash(&desired.key()), None);

        store.fail_writes.store(false, Ordering::SeqCst);
        assert!(cache.apply(&desired).await.unwrap().wrote());
    }

    #[tokio::test]
    async fn test_delete_forgets() {
        let (store, cache) = cache();
        let desired = config_map(json!({"a": "1"}));
        cache.apply(&desired).await.unwrap();

        assert!(cache.delete(&desired.key()).await.unwrap());
        assert!(!cache.delete(&desired.key()).await.unwrap());
        assert_eq!(cache.recorded_hash(&desired.key()), None);
        assert!(store.inner.is_empty());

        assert!(matches!(cache.apply(&desired).await.unwrap(), ApplyOutcome::Created(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_applies_serialize_per_key() {
        let (store, cache) = cache();
        let cache = Arc::new(cache);
        let desired = config_map(json!({"a": "1"}));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let desired = desired.clone();
                tokio::spawn(async move { cache.apply(&desired).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
        assert_eq!(store.patches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_applies_around_delete_stay_serialized() {
        let (store, cache) = cache();
        let cache = Arc::new(cache);
        let desired = config_map(json!({"a": "1"}));
        let key = desired.key();
        cache.apply(&desired).await.unwrap();
        let lock = cache.lock_for(&key);

        store.hold_deletes.store(true, Ordering::SeqCst);
        let deleting = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.delete(&key).await })
        };
        store.delete_started.notified().await;

        store.slow_reads.store(true, Ordering::SeqCst);
        let queued = {
            let cache = cache.clone();
            let desired = desired.clone();
            tokio::spawn(async move { cache.apply(&desired).await })
        };
        // Let the apply queue up behind the delete.
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.release_delete.notify_one();
        assert!(deleting.await.unwrap().unwrap());

        let late = {
            let cache = cache.clone();
            let desired = desired.clone();
            tokio::spawn(async move { cache.apply(&desired).await })
        };

        let queued = queued.await.unwrap().unwrap();
        let late = late.await.unwrap().unwrap();
        assert!(matches!(queued, ApplyOutcome::Created(_)));
        assert!(matches!(late, ApplyOutcome::Skipped(_)));
        assert_eq!(store.max_reads_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(store.creates.load(Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(&lock, &cache.lock_for(&key)));
    }
}
