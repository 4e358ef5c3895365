//! A source and two agents over the in-memory broker, end to end.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use driftsync::core::{
    ConditionStatus, DeleteOption, Manifest, PropagationPolicy, ResourceObject,
};
use driftsync::store::{MemoryStore, ObjectKey, SqliteStore, Store};
use driftsync::sync::memory::{MemoryBroker, MemoryTransport};
use driftsync::sync::SyncConfig;
use driftsync::work::{SharedOptions, WorkBuilderConfig};
use driftsync::{AgentNode, Config, SourceNode};

const WAIT: Duration = Duration::from_secs(5);

fn config(cluster: &str) -> Config {
    Config {
        source_id: "hub".into(),
        cluster_name: cluster.into(),
        sync: SyncConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_reconnect_backoff(Duration::from_millis(20)),
        work: WorkBuilderConfig::default().with_manifests_limit(4 * 1024),
        ..Default::default()
    }
}

fn config_map(name: &str, value: &str) -> Manifest {
    Manifest::new(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"namespace": "default", "name": name},
        "data": {"value": value},
    }))
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::new("v1", "ConfigMap", "default", name)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll until `check` passes or the wait runs out.
async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

struct Cluster {
    node: Arc<AgentNode>,
    store: Arc<MemoryStore>,
    transport: Arc<MemoryTransport>,
}

fn start_agent(broker: &Arc<MemoryBroker>, name: &str, cancel: &CancellationToken) -> Cluster {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(broker.connect_agent(name));
    let node = Arc::new(AgentNode::new(&config(name), transport.clone(), store.clone()).unwrap());
    let runner = node.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { runner.run(cancel).await });
    Cluster {
        node,
        store,
        transport,
    }
}

fn start_source(broker: &Arc<MemoryBroker>, cancel: &CancellationToken) -> Arc<SourceNode> {
    let source =
        Arc::new(SourceNode::new(&config("unused"), Arc::new(broker.connect_source("hub"))).unwrap());
    let runner = source.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { runner.run(cancel).await });
    source
}

fn all_applied(source: &SourceNode, cluster: &str) -> bool {
    let bundles = source.bundles().for_cluster(cluster);
    !bundles.is_empty()
        && bundles.iter().all(|b| {
            b.status.as_ref().map_or(false, |s| {
                s.conditions.iter().any(|c| {
                    c.status == ConditionStatus::True
                        && c.observed_generation == b.metadata.generation
                })
            })
        })
}

#[tokio::test]
async fn test_work_round_trip() {
    init_tracing();
    let cancel = CancellationToken::new();
    let broker = MemoryBroker::new();
    let source = start_source(&broker, &cancel);
    let east = start_agent(&broker, "east", &cancel);
    let west = start_agent(&broker, "west", &cancel);

    let manifests: Vec<Manifest> = (0..6).map(|i| config_map(&format!("cm-{i}"), "1")).collect();
    source
        .distribute("east", manifests.clone(), &SharedOptions::default())
        .await
        .unwrap();
    source
        .distribute("west", manifests[..2].to_vec(), &SharedOptions::default())
        .await
        .unwrap();

    eventually("east objects", || east.store.len() == 6).await;
    eventually("west objects", || west.store.len() == 2).await;
    eventually("east status", || all_applied(&source, "east")).await;
    eventually("west status", || all_applied(&source, "west")).await;

    // Shrink east: dropped objects are pruned, no other cluster is touched.
    source
        .distribute("east", manifests[..3].to_vec(), &SharedOptions::default())
        .await
        .unwrap();
    eventually("east pruned", || east.store.len() == 3).await;
    assert_eq!(west.store.len(), 2);

    // Empty desired state: work deleted on the agent and forgotten by the source.
    source
        .distribute("east", Vec::new(), &SharedOptions::default())
        .await
        .unwrap();
    eventually("east emptied", || east.store.is_empty()).await;
    eventually("deletion confirmed", || {
        source.bundles().for_cluster("east").is_empty()
    })
    .await;
    assert!(east.node.bundles().is_empty());

    cancel.cancel();
}

#[tokio::test]
async fn test_orphaned_objects_survive_deletion() {
    init_tracing();
    let cancel = CancellationToken::new();
    let broker = MemoryBroker::new();
    let source = start_source(&broker, &cancel);
    let east = start_agent(&broker, "east", &cancel);

    let options = SharedOptions {
        delete_option: Some(DeleteOption {
            propagation_policy: PropagationPolicy::Orphan,
            selectively_orphan: vec![],
        }),
        ..Default::default()
    };
    source
        .distribute("east", vec![config_map("keep", "1")], &options)
        .await
        .unwrap();
    eventually("applied", || east.store.len() == 1).await;

    source.distribute("east", Vec::new(), &options).await.unwrap();
    eventually("work removed", || east.node.bundles().is_empty()).await;
    assert!(east.store.get(&key("keep")).await.is_ok());

    cancel.cancel();
}

#[tokio::test]
async fn test_agent_catches_up_after_reconnect() {
    init_tracing();
    let cancel = CancellationToken::new();
    let broker = MemoryBroker::new();
    let source = start_source(&broker, &cancel);
    let east = start_agent(&broker, "east", &cancel);

    source
        .distribute("east", vec![config_map("a", "1")], &SharedOptions::default())
        .await
        .unwrap();
    eventually("first apply", || east.store.len() == 1).await;

    // Published while the agent is away: lost in transit, recovered by resync.
    east.transport.disconnect();
    source
        .distribute(
            "east",
            vec![config_map("a", "2"), config_map("b", "1")],
            &SharedOptions::default(),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(east.store.len(), 1);
    east.transport.reconnect();

    eventually("caught up", || east.store.len() == 2).await;
    let a = east.store.get(&key("a")).await.unwrap();
    assert_eq!(a.fields["data"], json!({"value": "2"}));
    eventually("status reported", || all_applied(&source, "east")).await;

    cancel.cancel();
}

#[tokio::test]
async fn test_late_agent_receives_existing_work() {
    init_tracing();
    let cancel = CancellationToken::new();
    let broker = MemoryBroker::new();
    let source = start_source(&broker, &cancel);

    // No agent yet: the publish goes nowhere.
    source
        .distribute("late", vec![config_map("a", "1"), config_map("b", "1")], &SharedOptions::default())
        .await
        .unwrap();

    let late = start_agent(&broker, "late", &cancel);
    eventually("resync delivered work", || late.store.len() == 2).await;
    let bundles = late.node.bundles().for_cluster("late");
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].resource_version(), "1");

    cancel.cancel();
}

#[tokio::test]
async fn test_agent_on_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("agent.db")).unwrap());

    init_tracing();
    let cancel = CancellationToken::new();
    let broker = MemoryBroker::new();
    let source = start_source(&broker, &cancel);
    let agent = Arc::new(
        AgentNode::new(&config("east"), Arc::new(broker.connect_agent("east")), store.clone())
            .unwrap(),
    );
    let runner = agent.clone();
    let token = cancel.clone();
    tokio::spawn(async move { runner.run(token).await });

    source
        .distribute(
            "east",
            vec![config_map("a", "1"), config_map("b", "1")],
            &SharedOptions::default(),
        )
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if store.list(Some("default")).await.unwrap().len() == 2 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "objects never landed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    eventually("status reported", || all_applied(&source, "east")).await;

    let a = store.get(&key("a")).await.unwrap();
    assert_eq!(a.metadata.resource_version, "1");
    assert_eq!(a.fields["data"], json!({"value": "1"}));

    cancel.cancel();
}
