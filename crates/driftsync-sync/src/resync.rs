//! Fingerprint lists exchanged during resync, and their comparison.
//!
//! Spec resync runs agent → source with resource versions; status resync
//! runs source → agent with status hashes. Comparison is strict equality of
//! fingerprints. An absent or empty payload is an empty list, which asks the
//! other side for everything.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use driftsync_core::{ContentHash, DataType, Envelope, Payload, ResourceObject};

use crate::error::{Result, SyncError};

/// One entry of a spec fingerprint list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersion {
    #[serde(rename = "resourceID")]
    pub resource_id: String,
    #[serde(rename = "resourceVersion")]
    pub resource_version: i64,
}

/// Spec fingerprints an agent holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersionList {
    #[serde(rename = "resourceVersions", default)]
    pub resource_versions: Vec<ResourceVersion>,
}

/// One entry of a status fingerprint list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatusHash {
    #[serde(rename = "resourceID")]
    pub resource_id: String,
    #[serde(rename = "statusHash")]
    pub status_hash: ContentHash,
}

/// Status fingerprints a source holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHashList {
    #[serde(rename = "statusHashes", default)]
    pub status_hashes: Vec<ResourceStatusHash>,
}

impl ResourceVersionList {
    /// Fingerprint the given resources.
    pub fn from_resources<R: ResourceObject>(resources: &[R]) -> Result<Self> {
        let resource_versions = resources
            .iter()
            .map(|r| {
                Ok(ResourceVersion {
                    resource_id: r.uid().to_string(),
                    resource_version: r.version_number()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { resource_versions })
    }

    pub fn to_payload(&self) -> Result<Payload> {
        to_payload(self)
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        from_envelope(envelope)
    }

    pub fn is_empty(&self) -> bool {
        self.resource_versions.is_empty()
    }
}

impl StatusHashList {
    /// Fingerprint the given resources with a status hash function.
    pub fn from_resources<R, F>(resources: &[R], hash: F) -> Result<Self>
    where
        F: Fn(&R) -> driftsync_core::Result<ContentHash>,
        R: ResourceObject,
    {
        let status_hashes = resources
            .iter()
            .map(|r| {
                Ok(ResourceStatusHash {
                    resource_id: r.uid().to_string(),
                    status_hash: hash(r)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { status_hashes })
    }

    pub fn to_payload(&self) -> Result<Payload> {
        to_payload(self)
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        from_envelope(envelope)
    }

    pub fn is_empty(&self) -> bool {
        self.status_hashes.is_empty()
    }
}

fn to_payload<T: Serialize>(list: &T) -> Result<Payload> {
    let body =
        serde_json::to_vec(list).map_err(|e| SyncError::InvalidResyncPayload(e.to_string()))?;
    Ok(Payload::Data(Bytes::from(body)))
}

fn from_envelope<T: Default + for<'de> Deserialize<'de>>(envelope: &Envelope) -> Result<T> {
    match envelope.data() {
        Some(body) if !body.is_empty() => serde_json::from_slice(body)
            .map_err(|e| SyncError::InvalidResyncPayload(e.to_string())),
        _ => Ok(T::default()),
    }
}

/// Source-held resources the agent lacks or holds at an older version.
pub fn stale_resources<'a, R: ResourceObject>(
    agent: &ResourceVersionList,
    source: &'a [R],
) -> Vec<&'a R> {
    let held: HashMap<&str, i64> = agent
        .resource_versions
        .iter()
        .map(|v| (v.resource_id.as_str(), v.resource_version))
        .collect();

    source
        .iter()
        .filter(|r| match (held.get(r.uid()), r.version_number()) {
            (None, _) => true,
            (Some(held), Ok(current)) => *held < current,
            (Some(_), Err(_)) => false,
        })
        .collect()
}

/// Agent-listed resource ids the source does not know.
pub fn unknown_entries<R: ResourceObject>(agent: &ResourceVersionList, source: &[R]) -> Vec<String> {
    let known: HashSet<&str> = source.iter().map(|r| r.uid()).collect();
    agent
        .resource_versions
        .iter()
        .filter(|v| !known.contains(v.resource_id.as_str()))
        .map(|v| v.resource_id.clone())
        .collect()
}

/// Outcome of comparing a source's status fingerprints with local state.
#[derive(Debug)]
pub struct StatusDrift<'a, R> {
    /// Local resources whose status the source lacks or holds differently.
    pub changed: Vec<&'a R>,
    /// Resource ids the source lists that no longer exist locally.
    pub missing: Vec<String>,
}

/// Compare a source's status fingerprints against local resources.
pub fn status_drift<'a, R, F>(
    source: &StatusHashList,
    local: &'a [R],
    hash: F,
) -> Result<StatusDrift<'a, R>>
where
    R: ResourceObject,
    F: Fn(&R) -> driftsync_core::Result<ContentHash>,
{
    let listed: HashMap<&str, ContentHash> = source
        .status_hashes
        .iter()
        .map(|h| (h.resource_id.as_str(), h.status_hash))
        .collect();

    let mut changed = Vec::new();
    for resource in local {
        let current = hash(resource)?;
        if listed.get(resource.uid()) != Some(&current) {
            changed.push(resource);
        }
    }

    let present: HashSet<&str> = local.iter().map(|r| r.uid()).collect();
    let missing = source
        .status_hashes
        .iter()
        .filter(|h| !present.contains(h.resource_id.as_str()))
        .map(|h| h.resource_id.clone())
        .collect();

    Ok(StatusDrift { changed, missing })
}

/// An outstanding resync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResync {
    pub data_type: DataType,
    /// Target cluster; empty for a broadcast.
    pub cluster: String,
    /// Requests sent so far.
    pub attempts: u32,
}

/// Tracks resync requests awaiting any response.
///
/// A request is answered by the first event of its data type from the
/// targeted cluster. Unanswered requests expire after the configured window.
#[derive(Default)]
pub struct ResyncTracker {
    pending: Mutex<HashMap<(DataType, String), (Instant, u32)>>,
}

impl ResyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request; returns the attempt number.
    pub fn start(&self, data_type: &DataType, cluster: &str) -> u32 {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let entry = pending
            .entry((data_type.clone(), cluster.to_string()))
            .or_insert((Instant::now(), 0));
        entry.0 = Instant::now();
        entry.1 += 1;
        entry.1
    }

    /// Mark requests for this data type answered. Also clears a broadcast.
    pub fn complete(&self, data_type: &DataType, cluster: &str) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let targeted = pending
            .remove(&(data_type.clone(), cluster.to_string()))
            .is_some();
        let broadcast = pending.remove(&(data_type.clone(), String::new())).is_some();
        targeted || broadcast
    }

    /// Remove and return requests older than `timeout`.
    pub fn expired(&self, timeout: Duration) -> Vec<PendingResync> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let expired: Vec<(DataType, String)> = pending
            .iter()
            .filter(|(_, (sent, _))| now.duration_since(*sent) >= timeout)
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| {
                pending.remove(&key).map(|(_, attempts)| PendingResync {
                    data_type: key.0,
                    cluster: key.1,
                    attempts,
                })
            })
            .collect()
    }

    /// Re-register an expired request so its attempt count carries over.
    pub fn retry(&self, request: &PendingResync) -> u32 {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let attempts = request.attempts + 1;
        pending.insert(
            (request.data_type.clone(), request.cluster.clone()),
            (Instant::now(), attempts),
        );
        attempts
    }

    pub fn is_pending(&self, data_type: &DataType, cluster: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&(data_type.clone(), cluster.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::{bundle_data_type, ManifestBundle, ObjectMeta};

    fn bundle(uid: &str, version: i64) -> ManifestBundle {
        let mut meta = ObjectMeta::named("cluster1", uid);
        meta.uid = uid.into();
        meta.resource_version = version.to_string();
        ManifestBundle::new(meta, Default::default())
    }

    fn versions(entries: &[(&str, i64)]) -> ResourceVersionList {
        ResourceVersionList {
            resource_versions: entries
                .iter()
                .map(|(id, v)| ResourceVersion {
                    resource_id: id.to_string(),
                    resource_version: *v,
                })
                .collect(),
        }
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(versions(&[("a", 3)])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"resourceVersions": [{"resourceID": "a", "resourceVersion": 3}]})
        );

        let hashes = StatusHashList::from_resources(&[bundle("a", 1)], |r| r.status_hash()).unwrap();
        let json = serde_json::to_value(&hashes).unwrap();
        assert!(json["statusHashes"][0]["statusHash"].is_string());
    }

    #[test]
    fn test_empty_payload_is_empty_list() {
        let env = Envelope::with_raw_type("x", "agent");
        assert!(ResourceVersionList::from_envelope(&env).unwrap().is_empty());
        assert!(StatusHashList::from_envelope(&env).unwrap().is_empty());
    }

    #[test]
    fn test_payload_roundtrip() {
        let list = versions(&[("a", 1), ("b", 2)]);
        let env = Envelope::with_raw_type("x", "agent").payload(list.to_payload().unwrap());
        assert_eq!(ResourceVersionList::from_envelope(&env).unwrap(), list);
    }

    #[test]
    fn test_bad_payload() {
        let env = Envelope::with_raw_type("x", "agent")
            .payload(Payload::Data(Bytes::from_static(b"[1,2")));
        assert!(matches!(
            ResourceVersionList::from_envelope(&env),
            Err(SyncError::InvalidResyncPayload(_))
        ));
    }

    #[test]
    fn test_stale_resources() {
        let source = vec![bundle("a", 5), bundle("b", 5), bundle("c", 5)];
        let agent = versions(&[("a", 5), ("b", 4), ("z", 9)]);
        let stale: Vec<&str> = stale_resources(&agent, &source).into_iter().map(|r| r.uid()).collect();
        assert_eq!(stale, vec!["b", "c"]);
        assert_eq!(unknown_entries(&agent, &source), vec!["z".to_string()]);
    }

    #[test]
    fn test_empty_lists() {
        let none: Vec<ManifestBundle> = vec![];
        assert!(stale_resources(&ResourceVersionList::default(), &none).is_empty());

        let three = vec![bundle("a", 1), bundle("b", 1), bundle("c", 1)];
        assert_eq!(stale_resources(&ResourceVersionList::default(), &three).len(), 3);
    }

    #[test]
    fn test_status_drift() {
        let a = bundle("a", 1);
        let mut b = bundle("b", 1);
        let source = StatusHashList::from_resources(&[a.clone(), b.clone(), bundle("gone", 1)], |r| {
            r.status_hash()
        })
        .unwrap();

        b.status = Some(Default::default());
        b.status.as_mut().unwrap().conditions.push(driftsync_core::Condition::new(
            "Applied",
            driftsync_core::ConditionStatus::True,
        ));
        let local = vec![a, b];
        let drift = status_drift(&source, &local, |r| r.status_hash()).unwrap();
        let changed: Vec<&str> = drift.changed.iter().map(|r| r.uid()).collect();
        assert_eq!(changed, vec!["b"]);
        assert_eq!(drift.missing, vec!["gone".to_string()]);
    }

    #[test]
    fn test_status_drift_empty_source_list() {
        let local = vec![bundle("a", 1), bundle("b", 1)];
        let drift = status_drift(&StatusHashList::default(), &local, |r| r.status_hash()).unwrap();
        assert_eq!(drift.changed.len(), 2);
        assert!(drift.missing.is_empty());
    }

    #[test]
    fn test_resync_tracker() {
        let tracker = ResyncTracker::new();
        let dt = bundle_data_type();
        assert_eq!(tracker.start(&dt, "cluster1"), 1);
        assert!(tracker.is_pending(&dt, "cluster1"));
        assert!(tracker.complete(&dt, "cluster1"));
        assert!(!tracker.complete(&dt, "cluster1"));

        tracker.start(&dt, "cluster2");
        let expired = tracker.expired(Duration::ZERO);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].attempts, 1);
        assert!(!tracker.is_pending(&dt, "cluster2"));

        assert_eq!(tracker.retry(&expired[0]), 2);
        assert!(tracker.is_pending(&dt, "cluster2"));
    }

    #[test]
    fn test_broadcast_cleared_by_any_cluster() {
        let tracker = ResyncTracker::new();
        let dt = bundle_data_type();
        tracker.start(&dt, "");
        assert!(tracker.complete(&dt, "cluster7"));
        assert!(!tracker.is_pending(&dt, ""));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeMap;

        fn fleet() -> impl Strategy<Value = BTreeMap<String, i64>> {
            prop::collection::btree_map("[a-f]{1,3}", 1i64..20, 0..12)
        }

        proptest! {
            #[test]
            fn test_own_fingerprints_are_never_stale(source in fleet()) {
                let bundles: Vec<_> = source.iter().map(|(id, v)| bundle(id, *v)).collect();
                let list = ResourceVersionList::from_resources(&bundles).unwrap();
                prop_assert!(stale_resources(&list, &bundles).is_empty());
                prop_assert!(unknown_entries(&list, &bundles).is_empty());
            }

            #[test]
            fn test_stale_means_missing_or_older(source in fleet(), agent in fleet()) {
                let bundles: Vec<_> = source.iter().map(|(id, v)| bundle(id, *v)).collect();
                let held: Vec<(&str, i64)> = agent.iter().map(|(id, v)| (id.as_str(), *v)).collect();
                let list = versions(&held);

                let stale: Vec<&str> =
                    stale_resources(&list, &bundles).into_iter().map(|b| b.uid()).collect();
                let expected: Vec<&str> = source
                    .iter()
                    .filter(|(id, v)| agent.get(*id).map_or(true, |held| *held < **v))
                    .map(|(id, _)| id.as_str())
                    .collect();
                prop_assert_eq!(stale, expected);

                let unknown = unknown_entries(&list, &bundles);
                prop_assert!(unknown.iter().all(|id| !source.contains_key(id)));
            }
        }
    }
}
