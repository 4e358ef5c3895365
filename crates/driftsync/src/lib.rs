//! # Driftsync
//!
//! Keeps desired state flowing from a source to cluster agents, and
//! observed status flowing back, over an asynchronous event transport.
//!
//! ## Overview
//!
//! - **Source**: packs manifests into size-bounded bundles
//!   ([`WorkDistributor`]), publishes them, and answers agents' resync
//!   requests from its [`ResourceCache`].
//! - **Agent**: applies each bundle's manifests to a durable store through
//!   an apply cache ([`BundleApplier`]) and reports status back.
//! - Both sides resync on start and after every reconnect, and process
//!   events for the same resource strictly in order.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use driftsync::{AgentNode, Config, SourceNode};
//! use driftsync::core::Manifest;
//! use driftsync::store::MemoryStore;
//! use driftsync::sync::memory::MemoryBroker;
//! use driftsync::work::SharedOptions;
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example() -> driftsync::Result<()> {
//!     let config = Config::from_json(r#"{"source_id": "hub", "cluster_name": "cluster1"}"#)?;
//!     let broker = MemoryBroker::new();
//!     let source = Arc::new(SourceNode::new(&config, Arc::new(broker.connect_source("hub")))?);
//!     let agent = Arc::new(AgentNode::new(
//!         &config,
//!         Arc::new(broker.connect_agent("cluster1")),
//!         Arc::new(MemoryStore::new()),
//!     )?);
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn({
//!         let (agent, cancel) = (agent.clone(), cancel.clone());
//!         async move { agent.run(cancel).await }
//!     });
//!     tokio::spawn({
//!         let (source, cancel) = (source.clone(), cancel.clone());
//!         async move { source.run(cancel).await }
//!     });
//!
//!     let manifests = vec![Manifest::new(json!({
//!         "apiVersion": "v1",
//!         "kind": "ConfigMap",
//!         "metadata": {"namespace": "default", "name": "settings"},
//!     }))];
//!     source.distribute("cluster1", manifests, &SharedOptions::default()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `driftsync::core` - Event types, envelopes, codecs, bundles
//! - `driftsync::store` - Durable store boundary, SQLite and in-memory
//! - `driftsync::sync` - Transport, resync protocol, source and agent clients
//! - `driftsync::work` - Work builder and apply cache

pub mod applier;
pub mod cache;
pub mod config;
pub mod distributor;
pub mod error;
pub mod node;

// Re-export component crates
pub use driftsync_core as core;
pub use driftsync_store as store;
pub use driftsync_sync as sync;
pub use driftsync_work as work;

pub use applier::BundleApplier;
pub use cache::ResourceCache;
pub use config::Config;
pub use distributor::{DistributeReport, WorkDistributor};
pub use error::{DriftError, Result};
pub use node::{bundle_codecs, AgentNode, SourceNode};

pub use driftsync_core::{
    EventAction, EventType, Manifest, ManifestBundle, ManifestBundleCodec, SubResource,
};
