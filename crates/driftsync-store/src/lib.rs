//! # Driftsync Store
//!
//! The durable-store boundary consumed by the work builder and the apply
//! cache, with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! Objects are opaque JSON documents with a type header and metadata,
//! addressed by [`ObjectKey`]. Stores assign identity and resource versions
//! and enforce optimistic concurrency on patch.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`Object`] / [`ObjectKey`] - Stored documents and their identity
//!
//! ## Usage
//!
//! ```rust,no_run
//! use driftsync_store::{Object, SqliteStore, Store};
//! use driftsync_core::Manifest;
//! use serde_json::json;
//!
//! async fn example() -> driftsync_store::Result<()> {
//!     let store = SqliteStore::open("objects.db")?;
//!
//!     let manifest = Manifest::new(json!({
//!         "apiVersion": "v1",
//!         "kind": "ConfigMap",
//!         "metadata": {"namespace": "default", "name": "settings"},
//!     }));
//!     let created = store.create(&Object::from_manifest(&manifest)?).await?;
//!     store
//!         .patch(&created.key(), &json!({"data": {"mode": "fast"}}), None)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod migration;
pub mod object;
pub mod patch;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use object::{Object, ObjectKey};
pub use sqlite::SqliteStore;
pub use traits::{Store, StoreExt};
