//! # Driftsync Work
//!
//! Turns a desired manifest list into size-bounded work units, and applies
//! objects to a durable store without redundant writes.
//!
//! ## Overview
//!
//! - [`WorkBuilder`] packs manifests greedily in input order and aligns the
//!   result with the units that already exist, so re-running a build with
//!   unchanged input yields nothing to apply and nothing to delete.
//! - [`ApplyCache`] sits in front of a [`driftsync_store::Store`] and skips
//!   writes whose desired state it has already written.
//!
//! ## Usage
//!
//! ```rust
//! use driftsync_core::Manifest;
//! use driftsync_work::{SharedOptions, WorkBuilder, WorkBuilderConfig};
//! use serde_json::json;
//!
//! let builder = WorkBuilder::new(WorkBuilderConfig::default()).unwrap();
//! let manifests = vec![Manifest::new(json!({
//!     "apiVersion": "v1",
//!     "kind": "ConfigMap",
//!     "metadata": {"namespace": "default", "name": "settings"},
//! }))];
//!
//! let out = builder.build("cluster1", &[], manifests.clone(), &SharedOptions::default());
//! assert_eq!(out.to_apply.len(), 1);
//!
//! let again = builder.build("cluster1", &out.to_apply, manifests, &SharedOptions::default());
//! assert!(again.is_empty());
//! ```

pub mod apply;
pub mod builder;
pub mod config;
pub mod error;

pub use apply::{desired_hash, ApplyCache, ApplyOutcome};
pub use builder::{BuildOutput, SharedOptions, WorkBuilder};
pub use config::{ApplyCacheConfig, WorkBuilderConfig};
pub use error::{Result, WorkError};
