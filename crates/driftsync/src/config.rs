//! Top-level configuration.

use serde::{Deserialize, Serialize};

use driftsync_sync::SyncConfig;
use driftsync_work::{ApplyCacheConfig, WorkBuilderConfig};

use crate::error::{DriftError, Result};

/// Everything a source or agent process needs to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity of the source; echoed back by agents as `originalsource`.
    pub source_id: String,
    /// Cluster an agent serves.
    pub cluster_name: String,
    pub sync: SyncConfig,
    pub work: WorkBuilderConfig,
    pub apply: ApplyCacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_id: "source".into(),
            cluster_name: "cluster".into(),
            sync: SyncConfig::default(),
            work: WorkBuilderConfig::default(),
            apply: ApplyCacheConfig::default(),
        }
    }
}

impl Config {
    /// Load from JSON; omitted fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| DriftError::Config(e.to_string()))?;
        if config.source_id.is_empty() {
            return Err(DriftError::Config("source_id must not be empty".into()));
        }
        if config.cluster_name.is_empty() {
            return Err(DriftError::Config("cluster_name must not be empty".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_json_partial() {
        let config = Config::from_json(
            r#"{
                "source_id": "hub",
                "cluster_name": "cluster1",
                "sync": {"resync_timeout": 5000},
                "work": {"manifests_limit": 1024}
            }"#,
        )
        .unwrap();
        assert_eq!(config.source_id, "hub");
        assert_eq!(config.sync.resync_timeout, Duration::from_secs(5));
        assert_eq!(config.sync.poll_interval, SyncConfig::default().poll_interval);
        assert_eq!(config.work.manifests_limit, 1024);
        assert_eq!(config.apply, ApplyCacheConfig::default());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(Config::from_json("{"), Err(DriftError::Config(_))));
        assert!(matches!(
            Config::from_json(r#"{"source_id": ""}"#),
            Err(DriftError::Config(_))
        ));
    }
}
