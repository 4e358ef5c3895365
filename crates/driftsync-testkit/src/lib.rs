//! # driftsync Testkit
//!
//! Testing utilities for driftsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Fixed inputs with expected wire strings, canonical
//!   bytes and packing results, so any implementation can be checked
//!   against the same answers
//! - **Generators**: Proptest strategies for manifests, event types and bundles
//! - **Fixtures**: Manifest builders and a running source/agent topology
//!
//! ## Golden Vectors
//!
//! ```rust
//! use driftsync_testkit::vectors::{canonical_vectors, verify_canonical_vectors};
//!
//! assert!(!canonical_vectors().is_empty());
//! for (name, ok, hex) in verify_canonical_vectors() {
//!     assert!(ok, "{name}: {hex}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use driftsync_testkit::generators::event_type;
//!
//! proptest! {
//!     #[test]
//!     fn wire_form_roundtrips(t in event_type()) {
//!         let wire = t.format().unwrap();
//!         prop_assert_eq!(EventType::parse(&wire).unwrap(), t);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use driftsync_testkit::fixtures::{config_map, Topology};
//! use driftsync::work::SharedOptions;
//!
//! # async fn demo() -> driftsync::Result<()> {
//! let topology = Topology::start(&["east"])?;
//! topology
//!     .source
//!     .distribute("east", vec![config_map("app", "1")], &SharedOptions::default())
//!     .await?;
//! topology.wait_for_objects("east", 1).await;
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{config_map, init_tracing, manifest_of_size, Topology};
pub use generators::{event_type, manifest, manifests};
pub use vectors::{
    canonical_vectors, event_type_vectors, packing_vectors, verify_canonical_vectors,
    CanonicalVector, EventTypeVector, PackingVector,
};
