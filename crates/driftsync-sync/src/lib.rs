//! # Driftsync Sync
//!
//! Bidirectional resource synchronization between one source and many
//! agents over an asynchronous transport.
//!
//! ## Overview
//!
//! The source publishes desired state (the `spec` channel); agents publish
//! observed state back (the `status` channel). Both sides keep a
//! per-resource version record so that redelivered or reordered events are
//! dropped, and both recover from missed events with a fingerprint resync:
//!
//! 1. **Spec resync**: the agent sends the versions it holds; the source
//!    resends every resource the agent lacks or holds at an older version.
//! 2. **Status resync**: the source sends the status hashes it holds; the
//!    agent republishes every status that differs or is missing.
//!
//! Events for one resource are handled strictly in order; events for
//! different resources are handled in parallel.
//!
//! ## Key Types
//!
//! - [`SourceClient`] / [`AgentClient`] - The two ends of the protocol
//! - [`Transport`] - Envelope delivery; [`memory::MemoryBroker`] for tests
//! - [`ResourceHandler`] / [`Lister`] - Application seams
//! - [`VersionTracker`] - Per-identity last-applied bookkeeping
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use driftsync_core::{CodecRegistry, ManifestBundle, ManifestBundleCodec};
//! use driftsync_sync::{memory::MemoryBroker, AgentClient, Lister, ListOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Empty;
//! impl Lister<ManifestBundle> for Empty {
//!     fn list(&self, _: &ListOptions) -> driftsync_sync::Result<Vec<ManifestBundle>> {
//!         Ok(vec![])
//!     }
//!     fn get(&self, _: &str) -> Option<ManifestBundle> {
//!         None
//!     }
//! }
//!
//! async fn example() -> anyhow::Result<()> {
//!     let broker = MemoryBroker::new();
//!     let codecs = CodecRegistry::<ManifestBundle>::new().with(Arc::new(ManifestBundleCodec::new()))?;
//!     let agent = AgentClient::new(
//!         "cluster1",
//!         Arc::new(broker.connect_agent("cluster1")),
//!         codecs,
//!         Arc::new(Empty),
//!     );
//!     agent.subscribe(CancellationToken::new(), None).await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod resync;
pub mod source;
mod subscription;
pub mod tracker;
pub mod transport;

pub use agent::AgentClient;
pub use config::SyncConfig;
pub use dispatch::KeyedDispatcher;
pub use error::{Result, SyncError};
pub use handler::{
    default_status_hash, handler_fn, ListOptions, Lister, ResourceAction, ResourceHandler,
    StatusHashFn,
};
pub use resync::{ResourceVersionList, ResyncTracker, StatusHashList};
pub use source::SourceClient;
pub use tracker::{Admission, VersionTracker};
pub use transport::{memory, Transport};
