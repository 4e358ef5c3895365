//! Store trait: the durable-store boundary.
//!
//! The work builder and apply cache are storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::object::{Object, ObjectKey};

/// The Store trait: async interface for object persistence.
///
/// # Design Notes
///
/// - **Server-populated metadata**: `create` assigns `uid`, `generation`,
///   `creationTimestamp` and the first `resourceVersion`; every write that
///   changes the object bumps `resourceVersion`.
/// - **Optimistic concurrency**: `patch` with an expected version fails with
///   `Conflict` if the object has moved on.
/// - **Errors**: a missing object is `NotFound`, a duplicate create is
///   `AlreadyExists`.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Object Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get an object by key.
    async fn get(&self, key: &ObjectKey) -> Result<Object>;

    /// Create an object, returning it as stored.
    async fn create(&self, object: &Object) -> Result<Object>;

    /// Apply a JSON merge patch, returning the object as stored.
    ///
    /// A patch that changes nothing leaves the resource version untouched.
    async fn patch(
        &self,
        key: &ObjectKey,
        merge_patch: &Value,
        expected_version: Option<&str>,
    ) -> Result<Object>;

    /// Delete an object.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Bulk Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// List objects ordered by key, optionally within one namespace.
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Object>>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Get an object, mapping `NotFound` to `None`.
    fn get_opt(
        &self,
        key: &ObjectKey,
    ) -> impl std::future::Future<Output = Result<Option<Object>>> + Send;

    /// Delete an object, treating `NotFound` as success.
    fn delete_if_exists(
        &self,
        key: &ObjectKey,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn get_opt(&self, key: &ObjectKey) -> Result<Option<Object>> {
        match self.get(key).await {
            Ok(object) => Ok(Some(object)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_if_exists(&self, key: &ObjectKey) -> Result<bool> {
        match self.delete(key).await {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
