//! Per-identity version bookkeeping.
//!
//! Each client owns one [`VersionTracker`]. It remembers, per resource id,
//! the last version applied, the last status sequence and hash seen, and
//! whether the resource was deleted. It is never shared between clients.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use driftsync_core::ContentHash;

/// What a tracker knows about one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionRecord {
    /// Last applied resource version.
    pub version: i64,
    /// Last applied status sequence at `version`.
    pub sequence: Option<i64>,
    /// Last applied status hash at `version`.
    pub status_hash: Option<ContentHash>,
    pub deleted: bool,
    /// Source that published the resource (agent side).
    pub origin: Option<String>,
    /// Hash of the last status this side published.
    pub published_hash: Option<ContentHash>,
    /// Last sequence this side stamped on a published status.
    pub published_sequence: i64,
}

/// Whether an inbound event should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Older than (or equal to) what was already applied.
    Stale,
    /// Same version and same status hash as already applied.
    Unchanged,
    /// A deletion for a resource already deleted.
    AlreadyDeleted,
}

#[derive(Default)]
pub struct VersionTracker {
    records: Mutex<HashMap<String, VersionRecord>>,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut HashMap<String, VersionRecord>) -> T) -> T {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut records)
    }

    pub fn get(&self, id: &str) -> Option<VersionRecord> {
        self.with_records(|r| r.get(id).cloned())
    }

    pub fn last_version(&self, id: &str) -> Option<i64> {
        self.with_records(|r| r.get(id).map(|rec| rec.version))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.with_records(|r| r.contains_key(id))
    }

    pub fn len(&self) -> usize {
        self.with_records(|r| r.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn forget(&self, id: &str) {
        self.with_records(|r| r.remove(id));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Spec channel
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide whether a spec event may be applied.
    ///
    /// A version at or below the last applied one is a no-op. A deletion is
    /// applied once, unless it is older than the last applied version. A
    /// deleted resource sent again at its last version is taken back, since
    /// that is how a source restores work the agent lost.
    pub fn admit_spec(&self, id: &str, version: i64, deleting: bool) -> Admission {
        self.with_records(|records| match records.get(id) {
            None => Admission::Accept,
            Some(rec) if deleting && rec.deleted => Admission::AlreadyDeleted,
            Some(rec) if deleting && version < rec.version => Admission::Stale,
            Some(_) if deleting => Admission::Accept,
            Some(rec) if rec.deleted && version == rec.version => Admission::Accept,
            Some(rec) if version <= rec.version => Admission::Stale,
            Some(_) => Admission::Accept,
        })
    }

    /// Record an applied spec event.
    pub fn record_spec(&self, id: &str, version: i64, deleted: bool, origin: Option<&str>) {
        self.with_records(|records| {
            let rec = records.entry(id.to_string()).or_default();
            rec.version = rec.version.max(version);
            rec.deleted = deleted;
            if let Some(origin) = origin {
                rec.origin = Some(origin.to_string());
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status channel
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide whether a status event may be applied.
    ///
    /// Ordering is by (version, sequence). An exact repeat of the last
    /// applied status at the same version is `Unchanged`. Deletions bypass
    /// the version check.
    pub fn admit_status(
        &self,
        id: &str,
        version: i64,
        sequence: Option<i64>,
        hash: &ContentHash,
        deleting: bool,
    ) -> Admission {
        self.with_records(|records| {
            let Some(rec) = records.get(id) else {
                return Admission::Accept;
            };
            if deleting {
                return if rec.deleted {
                    Admission::AlreadyDeleted
                } else {
                    Admission::Accept
                };
            }
            if version < rec.version {
                return Admission::Stale;
            }
            if version == rec.version {
                if rec.status_hash.as_ref() == Some(hash) {
                    return Admission::Unchanged;
                }
                if let (Some(seq), Some(last)) = (sequence, rec.sequence) {
                    if seq <= last {
                        return Admission::Stale;
                    }
                }
            }
            Admission::Accept
        })
    }

    /// Record an applied status event.
    pub fn record_status(
        &self,
        id: &str,
        version: i64,
        sequence: Option<i64>,
        hash: ContentHash,
        deleted: bool,
    ) {
        self.with_records(|records| {
            let rec = records.entry(id.to_string()).or_default();
            if version > rec.version {
                rec.sequence = None;
            }
            rec.version = rec.version.max(version);
            if sequence.is_some() {
                rec.sequence = sequence;
            }
            rec.status_hash = Some(hash);
            rec.deleted = deleted;
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Publishing
    // ─────────────────────────────────────────────────────────────────────────

    /// Claim the next status sequence for a publish.
    ///
    /// Sequences are wall-clock microseconds, bumped past the last stamp
    /// when the clock has not moved, so a restarted agent keeps outranking
    /// what it published before. Returns `None` when the hash equals the
    /// last published one and the publish is not forced.
    pub fn stamp_publish(&self, id: &str, hash: ContentHash, force: bool) -> Option<i64> {
        self.with_records(|records| {
            let rec = records.entry(id.to_string()).or_default();
            if !force && rec.published_hash == Some(hash) {
                return None;
            }
            rec.published_hash = Some(hash);
            rec.published_sequence = clock_sequence().max(rec.published_sequence + 1);
            Some(rec.published_sequence)
        })
    }

    /// Forget the last published hash so the next publish goes out.
    pub fn clear_published(&self, id: &str) {
        self.with_records(|records| {
            if let Some(rec) = records.get_mut(id) {
                rec.published_hash = None;
            }
        });
    }

    /// Remember which source a resource came from.
    pub fn set_origin(&self, id: &str, origin: &str) {
        self.with_records(|records| {
            records.entry(id.to_string()).or_default().origin = Some(origin.to_string());
        });
    }

    pub fn origin(&self, id: &str) -> Option<String> {
        self.with_records(|r| r.get(id).and_then(|rec| rec.origin.clone()))
    }
}

fn clock_sequence() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}
