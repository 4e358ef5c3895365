//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by source and agent clients.
///
/// Durations serialize as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Receive timeout per loop turn; bounds how long cancellation and
    /// reconnects go unnoticed.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// How long to wait for any response to a resync request.
    #[serde(with = "duration_ms")]
    pub resync_timeout: Duration,
    /// Resends of an unanswered resync request before giving up.
    pub resync_retries: u32,
    /// Pause between connectivity checks while disconnected.
    #[serde(with = "duration_ms")]
    pub reconnect_backoff: Duration,
    /// Per-resource workers exit after this long without events.
    #[serde(with = "duration_ms")]
    pub idle_worker_timeout: Duration,
    /// Resync every registered data type when the subscription starts.
    pub resync_on_start: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            resync_timeout: Duration::from_secs(30),
            resync_retries: 1,
            reconnect_backoff: Duration::from_secs(1),
            idle_worker_timeout: Duration::from_secs(30),
            resync_on_start: true,
        }
    }
}

impl SyncConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_resync_timeout(mut self, timeout: Duration) -> Self {
        self.resync_timeout = timeout;
        self
    }

    pub fn with_resync_retries(mut self, retries: u32) -> Self {
        self.resync_retries = retries;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_idle_worker_timeout(mut self, timeout: Duration) -> Self {
        self.idle_worker_timeout = timeout;
        self
    }

    pub fn with_resync_on_start(mut self, enabled: bool) -> Self {
        self.resync_on_start = enabled;
        self
    }
}

/// Serde adapter: `Duration` as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(200));
        assert_eq!(config.resync_retries, 1);
        assert!(config.resync_on_start);
    }

    #[test]
    fn test_partial_json() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"resync_timeout": 1500, "resync_on_start": false}"#).unwrap();
        assert_eq!(config.resync_timeout, Duration::from_millis(1500));
        assert!(!config.resync_on_start);
        assert_eq!(config.reconnect_backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = SyncConfig::default().with_poll_interval(Duration::from_millis(50));
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<SyncConfig>(&json).unwrap(), config);
    }
}
