//! Work builder and apply cache settings.

use serde::{Deserialize, Serialize};

/// Default upper bound on the packed size of one work unit.
pub const DEFAULT_MANIFESTS_LIMIT: usize = 500 * 1024;

/// Work builder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkBuilderConfig {
    /// Size limit per unit, in serialized bytes.
    pub manifests_limit: usize,
    /// Units are named `{name_prefix}-{index}`.
    pub name_prefix: String,
}

impl Default for WorkBuilderConfig {
    fn default() -> Self {
        Self {
            manifests_limit: DEFAULT_MANIFESTS_LIMIT,
            name_prefix: "work".into(),
        }
    }
}

impl WorkBuilderConfig {
    pub fn with_manifests_limit(mut self, limit: usize) -> Self {
        self.manifests_limit = limit;
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }
}

/// Apply cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyCacheConfig {
    /// Fresh-read retries after a `Conflict` before giving up.
    pub max_conflict_retries: u32,
    /// Writer identity attached to apply logs.
    pub field_manager: String,
}

impl Default for ApplyCacheConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            field_manager: "driftsync".into(),
        }
    }
}

impl ApplyCacheConfig {
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = manager.into();
        self
    }
}
