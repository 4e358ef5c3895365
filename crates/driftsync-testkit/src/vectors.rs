//! Golden vectors.
//!
//! Fixed inputs with the answers every implementation must agree on: the
//! canonical bytes a document hashes over, how event type strings parse,
//! and how manifest sizes pack into work units.

use serde_json::Value;

use driftsync_core::{canonical_bytes, content_hash, EventType};

/// A JSON document and its canonical CBOR encoding.
#[derive(Debug, Clone)]
pub struct CanonicalVector {
    pub name: &'static str,
    pub json: &'static str,
    /// Expected canonical bytes, hex.
    pub canonical_hex: &'static str,
}

/// All canonical-encoding vectors.
pub fn canonical_vectors() -> Vec<CanonicalVector> {
    vec![
        CanonicalVector {
            name: "empty map",
            json: "{}",
            canonical_hex: "a0",
        },
        CanonicalVector {
            name: "single small integer",
            json: r#"{"a":1}"#,
            canonical_hex: "a1616101",
        },
        CanonicalVector {
            name: "keys sorted by encoded length first",
            json: r#"{"bb":0,"a":-1}"#,
            canonical_hex: "a261612062626200",
        },
        CanonicalVector {
            name: "simple values",
            json: "[true,false,null]",
            canonical_hex: "83f5f4f6",
        },
        CanonicalVector {
            name: "two-byte integer",
            json: r#"{"n":1000}"#,
            canonical_hex: "a1616e1903e8",
        },
        CanonicalVector {
            name: "float always 64-bit",
            json: r#"{"x":0.5}"#,
            canonical_hex: "a16178fb3fe0000000000000",
        },
        CanonicalVector {
            name: "negative and eight-byte integers",
            json: r#"{"neg":-500,"big":4294967296}"#,
            canonical_hex: "a2636269671b0000000100000000636e65673901f3",
        },
        CanonicalVector {
            name: "config map manifest",
            json: r#"{"kind":"ConfigMap","apiVersion":"v1","metadata":{"name":"app","namespace":"default"},"data":{"k":"v"}}"#,
            canonical_hex: "a46464617461a1616b6176646b696e6469436f6e6669674d6170686d65746164617461a2646e616d6563617070696e616d6573706163656764656661756c746a61706956657273696f6e627631",
        },
    ]
}

/// Encode every canonical vector, reporting `(name, matches, actual_hex)`.
pub fn verify_canonical_vectors() -> Vec<(String, bool, String)> {
    canonical_vectors()
        .iter()
        .map(|v| {
            let hex = match serde_json::from_str::<Value>(v.json) {
                Ok(doc) => hex::encode(canonical_bytes(&doc)),
                Err(e) => format!("unparseable: {e}"),
            };
            (v.name.to_string(), hex == v.canonical_hex, hex)
        })
        .collect()
}

/// Content hash of a vector's document, hex.
pub fn vector_hash(vector: &CanonicalVector) -> Option<String> {
    serde_json::from_str::<Value>(vector.json)
        .ok()
        .map(|doc| content_hash(&doc).to_hex())
}

/// An event type string and how it parses.
#[derive(Debug, Clone)]
pub struct EventTypeVector {
    pub wire: &'static str,
    /// `(group, version, resource, sub_resource, action)`, or `None` if the
    /// string must be rejected.
    pub parsed: Option<(&'static str, &'static str, &'static str, &'static str, &'static str)>,
}

/// All event type vectors.
pub fn event_type_vectors() -> Vec<EventTypeVector> {
    vec![
        EventTypeVector {
            wire: "io.example.works.v1alpha1.manifestbundles.spec.create_request",
            parsed: Some(("io.example.works", "v1alpha1", "manifestbundles", "spec", "create_request")),
        },
        EventTypeVector {
            wire: "io.example.works.v1alpha1.manifestbundles.status.update_request",
            parsed: Some(("io.example.works", "v1alpha1", "manifestbundles", "status", "update_request")),
        },
        EventTypeVector {
            wire: "example.v1.things.spec.resync",
            parsed: Some(("example", "v1", "things", "spec", "resync")),
        },
        EventTypeVector {
            wire: "a.b.c.d.e.v1.things.status.delete_request",
            parsed: Some(("a.b.c.d.e", "v1", "things", "status", "delete_request")),
        },
        EventTypeVector {
            wire: "v1.things.spec.create_request",
            parsed: None,
        },
        EventTypeVector {
            wire: "io.v1.things.scale.update_request",
            parsed: None,
        },
        EventTypeVector {
            wire: "io.v1.things.Spec.update_request",
            parsed: None,
        },
        EventTypeVector {
            wire: "io..v1.things.spec.create_request",
            parsed: None,
        },
        EventTypeVector {
            wire: "io.v1.things.spec.",
            parsed: None,
        },
    ]
}

/// Parse a vector's wire string into its five parts.
pub fn parse_vector(
    vector: &EventTypeVector,
) -> Option<(String, String, String, String, String)> {
    EventType::parse(vector.wire).ok().map(|t| {
        (
            t.data_type.group,
            t.data_type.version,
            t.data_type.resource,
            t.sub_resource.to_string(),
            t.action.to_string(),
        )
    })
}

/// Manifest sizes, a limit, and the unit lengths they pack into.
#[derive(Debug, Clone)]
pub struct PackingVector {
    pub name: &'static str,
    /// Manifest sizes in KiB, in input order.
    pub sizes_kib: &'static [usize],
    pub limit_kib: usize,
    /// Manifests per unit, in unit order.
    pub units: &'static [usize],
}

/// All packing vectors.
pub fn packing_vectors() -> Vec<PackingVector> {
    vec![
        PackingVector {
            name: "everything fits",
            sizes_kib: &[10, 10, 1, 1, 1],
            limit_kib: 21,
            units: &[5],
        },
        PackingVector {
            name: "split at the target count then overfill",
            sizes_kib: &[5, 10, 20, 11, 1, 1, 1],
            limit_kib: 21,
            units: &[2, 5],
        },
        PackingVector {
            name: "oversized manifest stands alone",
            sizes_kib: &[50, 300, 50],
            limit_kib: 100,
            units: &[1, 1, 1],
        },
        PackingVector {
            name: "last unit absorbs the remainder",
            sizes_kib: &[8, 8, 8, 8],
            limit_kib: 10,
            units: &[1, 1, 2],
        },
        PackingVector {
            name: "single small manifest",
            sizes_kib: &[1],
            limit_kib: 21,
            units: &[1],
        },
        PackingVector {
            name: "nothing to pack",
            sizes_kib: &[],
            limit_kib: 21,
            units: &[],
        },
    ]
}
