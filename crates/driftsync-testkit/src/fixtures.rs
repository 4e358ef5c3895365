//! Test fixtures and helpers.
//!
//! Common setup code for integration tests and benchmarks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use driftsync::{AgentNode, Config, SourceNode};
use driftsync_core::Manifest;
use driftsync_store::{MemoryStore, ObjectKey};
use driftsync_sync::memory::{MemoryBroker, MemoryTransport};
use driftsync_sync::SyncConfig;

/// How long the wait helpers poll before panicking.
pub const WAIT: Duration = Duration::from_secs(5);

/// Install a test-friendly tracing subscriber, honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A `v1/ConfigMap` in the `default` namespace.
pub fn config_map(name: &str, value: &str) -> Manifest {
    Manifest::new(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"namespace": "default", "name": name},
        "data": {"value": value},
    }))
}

/// Store key of a [`config_map`].
pub fn config_map_key(name: &str) -> ObjectKey {
    ObjectKey::new("v1", "ConfigMap", "default", name)
}

/// An opaque manifest whose serialized size is exactly `size` bytes.
///
/// Sizes below 8 are rounded up to 8, the size of the empty wrapper.
pub fn manifest_of_size(size: usize, tag: char) -> Manifest {
    Manifest::new(json!({ "d": tag.to_string().repeat(size.saturating_sub(8)) }))
}

/// Node configuration with short poll intervals.
pub fn fast_config(cluster_name: &str) -> Config {
    Config {
        source_id: "hub".into(),
        cluster_name: cluster_name.into(),
        sync: SyncConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_reconnect_backoff(Duration::from_millis(20)),
        ..Default::default()
    }
}

/// One running agent and the store it applies to.
pub struct TestAgent {
    pub node: Arc<AgentNode>,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<MemoryTransport>,
}

/// A source named `hub` and one agent per cluster, all on one broker.
///
/// Every node runs until the topology is dropped.
pub struct Topology {
    pub broker: Arc<MemoryBroker>,
    pub source: Arc<SourceNode>,
    pub agents: BTreeMap<String, TestAgent>,
    cancel: CancellationToken,
}

impl Topology {
    /// Start the source and agents. Must be called inside a tokio runtime.
    pub fn start(clusters: &[&str]) -> driftsync::Result<Self> {
        let broker = MemoryBroker::new();
        let cancel = CancellationToken::new();

        let source = Arc::new(SourceNode::new(
            &fast_config("hub"),
            Arc::new(broker.connect_source("hub")),
        )?);
        let runner = source.clone();
        let token = cancel.clone();
        tokio::spawn(async move { runner.run(token).await });

        let mut topology = Self {
            broker,
            source,
            agents: BTreeMap::new(),
            cancel,
        };
        for cluster in clusters {
            topology.add_agent(cluster)?;
        }
        Ok(topology)
    }

    /// Start another agent on the same broker.
    pub fn add_agent(&mut self, cluster: &str) -> driftsync::Result<&TestAgent> {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(self.broker.connect_agent(cluster));
        let node = Arc::new(AgentNode::new(
            &fast_config(cluster),
            transport.clone(),
            store.clone(),
        )?);
        let runner = node.clone();
        let token = self.cancel.clone();
        tokio::spawn(async move { runner.run(token).await });

        self.agents.insert(
            cluster.to_string(),
            TestAgent {
                node,
                store,
                transport,
            },
        );
        Ok(&self.agents[cluster])
    }

    /// The agent for `cluster`. Panics if it was never started.
    pub fn agent(&self, cluster: &str) -> &TestAgent {
        match self.agents.get(cluster) {
            Some(agent) => agent,
            None => panic!("no agent for cluster {cluster}"),
        }
    }

    /// Wait until the cluster's store holds exactly `count` objects.
    pub async fn wait_for_objects(&self, cluster: &str, count: usize) {
        let store = &self.agent(cluster).store;
        wait_until(&format!("{count} objects in {cluster}"), || store.len() == count).await;
    }
}

impl Drop for Topology {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Poll `check` until it holds. Panics after [`WAIT`].
pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
