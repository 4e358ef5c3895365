//! Golden vectors and cross-crate scenarios.
//!
//! Every implementation of the protocol must agree on:
//! - canonical bytes of a document
//! - how event type strings split into their parts
//! - how a manifest list packs into work units

use driftsync::work::{SharedOptions, WorkBuilder, WorkBuilderConfig};
use driftsync_core::{ConditionStatus, EventType, ResourceObject};
use driftsync_testkit::fixtures::{config_map, config_map_key, init_tracing, wait_until};
use driftsync_testkit::{
    canonical_vectors, event_type_vectors, manifest_of_size, packing_vectors,
    verify_canonical_vectors, Topology,
};
use driftsync_store::Store;

const KIB: usize = 1024;

#[test]
fn test_canonical_vectors() {
    let results = verify_canonical_vectors();
    assert_eq!(results.len(), canonical_vectors().len());
    for (name, ok, hex) in results {
        assert!(ok, "vector '{name}' encoded as {hex}");
    }
}

#[test]
fn test_event_type_vectors_roundtrip() {
    for vector in event_type_vectors() {
        match (EventType::parse(vector.wire), vector.parsed) {
            (Ok(parsed), Some(_)) => assert_eq!(parsed.format().unwrap(), vector.wire),
            (Err(_), None) => {}
            (got, want) => panic!("{:?}: got {got:?}, want {want:?}", vector.wire),
        }
    }
}

#[test]
fn test_packing_vectors() {
    for vector in packing_vectors() {
        let builder = WorkBuilder::new(
            WorkBuilderConfig::default().with_manifests_limit(vector.limit_kib * KIB),
        )
        .unwrap();
        let manifests = vector
            .sizes_kib
            .iter()
            .map(|s| manifest_of_size(s * KIB, 'x'))
            .collect();
        let units: Vec<usize> = builder.pack(manifests).iter().map(Vec::len).collect();
        assert_eq!(units, vector.units, "vector '{}'", vector.name);
    }
}

#[tokio::test]
async fn test_large_work_splits_across_units() {
    init_tracing();
    let topology = Topology::start(&["east"]).unwrap();

    // Default limit is 500 KiB: the first unit overfills to 600 KiB, the
    // third manifest then starts a second one.
    let manifests: Vec<_> = (0..3)
        .map(|i| {
            let mut m = config_map(&format!("big-{i}"), "1");
            m.0["data"]["pad"] = "x".repeat(300 * KIB).into();
            m
        })
        .collect();
    let report = topology
        .source
        .distribute("east", manifests, &SharedOptions::default())
        .await
        .unwrap();
    assert_eq!(report.applied, vec!["work-0", "work-1"]);
    assert!(report.deleted.is_empty());

    topology.wait_for_objects("east", 3).await;
    let agent = topology.agent("east");
    wait_until("both units cached", || agent.node.bundles().len() == 2).await;

    let mut names: Vec<String> = agent
        .node
        .bundles()
        .for_cluster("east")
        .iter()
        .map(|b| b.metadata.name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["work-0", "work-1"]);
}

#[tokio::test]
async fn test_status_flows_back_per_cluster() {
    init_tracing();
    let topology = Topology::start(&["east", "west"]).unwrap();

    for cluster in ["east", "west"] {
        topology
            .source
            .distribute(cluster, vec![config_map(cluster, "1")], &SharedOptions::default())
            .await
            .unwrap();
    }
    topology.wait_for_objects("east", 1).await;
    topology.wait_for_objects("west", 1).await;

    let east = topology.agent("east");
    assert!(east.store.get(&config_map_key("east")).await.is_ok());
    assert!(east.store.get(&config_map_key("west")).await.is_err());

    for cluster in ["east", "west"] {
        wait_until(&format!("{cluster} status"), || {
            topology.source.bundles().for_cluster(cluster).iter().all(|b| {
                b.status.as_ref().map_or(false, |s| {
                    s.conditions.iter().any(|c| c.status == ConditionStatus::True)
                })
            }) && !topology.source.bundles().for_cluster(cluster).is_empty()
        })
        .await;
    }

    let bundle = &topology.source.bundles().for_cluster("west")[0];
    assert_eq!(bundle.cluster_name(), "west");
    assert_eq!(bundle.resource_version(), "1");
}
