//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::json;

use driftsync_core::{
    BundleSpec, DataType, EventAction, EventType, Manifest, ManifestBundle, ObjectMeta,
    SubResource,
};

/// A single lowercase wire segment.
pub fn segment() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,11}".prop_map(String::from)
}

/// An API group with one to three dot-separated parts.
pub fn group() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 1..4).prop_map(|parts| parts.join("."))
}

/// Generate a SubResource.
pub fn sub_resource() -> impl Strategy<Value = SubResource> {
    prop_oneof![Just(SubResource::Spec), Just(SubResource::Status)]
}

/// Generate an action, weighted toward the standard verbs.
pub fn action() -> impl Strategy<Value = EventAction> {
    prop_oneof![
        3 => Just(EventAction::create_request()),
        3 => Just(EventAction::update_request()),
        2 => Just(EventAction::delete_request()),
        1 => Just(EventAction::resync_request()),
        1 => segment().prop_map(EventAction::new),
    ]
}

/// Generate a well-formed EventType.
pub fn event_type() -> impl Strategy<Value = EventType> {
    (group(), segment(), segment(), sub_resource(), action()).prop_map(
        |(group, version, resource, sub, action)| {
            EventType::new(DataType::new(group, version, resource), sub, action)
        },
    )
}

/// Generate a ConfigMap-shaped manifest with a payload of up to `max_len` bytes.
pub fn manifest(max_len: usize) -> impl Strategy<Value = Manifest> {
    (segment(), "[a-z0-9]*".prop_map(String::from), 0..=max_len).prop_map(|(name, value, pad)| {
        Manifest::new(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"namespace": "default", "name": name},
            "data": {"value": value, "pad": "x".repeat(pad)},
        }))
    })
}

/// Generate up to `max_count` manifests.
pub fn manifests(max_count: usize, max_len: usize) -> impl Strategy<Value = Vec<Manifest>> {
    prop::collection::vec(manifest(max_len), 0..=max_count)
}

/// Generate a bundle addressed to `cluster` at a positive resource version.
pub fn bundle(cluster: &'static str) -> impl Strategy<Value = ManifestBundle> {
    (segment(), 1i64..=1_000_000, manifests(4, 64)).prop_map(move |(name, rv, manifests)| {
        let mut meta = ObjectMeta::named(cluster, name.clone());
        meta.uid = format!("uid-{name}");
        meta.resource_version = rv.to_string();
        meta.generation = 1;
        ManifestBundle::new(
            meta,
            BundleSpec {
                manifests,
                ..Default::default()
            },
        )
    })
}
