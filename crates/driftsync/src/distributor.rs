//! Source side: turns desired manifests into published work units.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use driftsync_core::{
    bundle_data_type, now_millis, EventAction, EventType, Manifest, ManifestBundle,
    ResourceObject, SubResource,
};
use driftsync_sync::{Lister, ResourceAction, ResourceHandler, SourceClient};
use driftsync_work::{SharedOptions, WorkBuilder};

use crate::cache::ResourceCache;
use crate::error::Result;

/// Names of the units one distribution touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributeReport {
    pub applied: Vec<String>,
    pub deleted: Vec<String>,
}

/// Packs manifests into bundles per cluster and publishes the changes.
///
/// The cache is the source of truth for what has been published; it is
/// also the lister the [`SourceClient`] answers resyncs from. Used as the
/// client's status handler, it folds reported status back into the cache
/// and drops bundles once their deletion is confirmed.
pub struct WorkDistributor {
    builder: WorkBuilder,
    client: Arc<SourceClient<ManifestBundle>>,
    cache: Arc<ResourceCache<ManifestBundle>>,
    // One build at a time, so version bumps never interleave.
    build_lock: Mutex<()>,
}

impl WorkDistributor {
    pub fn new(
        builder: WorkBuilder,
        client: Arc<SourceClient<ManifestBundle>>,
        cache: Arc<ResourceCache<ManifestBundle>>,
    ) -> Self {
        Self {
            builder,
            client,
            cache,
            build_lock: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &Arc<ResourceCache<ManifestBundle>> {
        &self.cache
    }

    /// Make `manifests` the desired state of `cluster`.
    ///
    /// New units are published as creates, changed units as updates with
    /// the next resource version, and units no longer needed as deletions.
    /// Stops at the first publish failure; units already published stay
    /// recorded, so a retry picks up where this left off.
    pub async fn distribute(
        &self,
        cluster: &str,
        manifests: Vec<Manifest>,
        options: &SharedOptions,
    ) -> Result<DistributeReport> {
        let _guard = self.build_lock.lock().await;

        let existing: Vec<ManifestBundle> = self
            .cache
            .for_cluster(cluster)
            .into_iter()
            .filter(|b| !b.is_deleting())
            .collect();
        let output = self.builder.build(cluster, &existing, manifests, options);
        let mut report = DistributeReport::default();

        for mut bundle in output.to_apply {
            let action = if bundle.metadata.uid.is_empty() {
                bundle.metadata.uid = new_uid();
                bundle.metadata.resource_version = "1".into();
                bundle.metadata.generation = 1;
                bundle.metadata.creation_timestamp = Some(now_millis());
                EventAction::create_request()
            } else {
                bump(&mut bundle)?;
                bundle.metadata.generation += 1;
                EventAction::update_request()
            };
            self.client.publish(&spec_event(action), &bundle).await?;
            tracing::info!(
                work = %bundle.metadata.name,
                cluster,
                resource_id = %bundle.metadata.uid,
                resource_version = %bundle.metadata.resource_version,
                manifests = bundle.spec.manifests.len(),
                "published work"
            );
            report.applied.push(bundle.metadata.name.clone());
            self.cache.upsert(bundle);
        }

        for mut bundle in output.to_delete {
            bump(&mut bundle)?;
            bundle.metadata.deletion_timestamp = Some(now_millis());
            self.client
                .publish(&spec_event(EventAction::delete_request()), &bundle)
                .await?;
            tracing::info!(
                work = %bundle.metadata.name,
                cluster,
                resource_id = %bundle.metadata.uid,
                "published work deletion"
            );
            report.deleted.push(bundle.metadata.name.clone());
            self.cache.upsert(bundle);
        }

        Ok(report)
    }
}

#[async_trait]
impl ResourceHandler<ManifestBundle> for WorkDistributor {
    async fn handle(&self, action: ResourceAction, reported: ManifestBundle) -> anyhow::Result<()> {
        let id = reported.uid().to_string();
        let Some(mut cached) = self.cache.get(&id) else {
            tracing::debug!(resource_id = %id, ?action, "status for unknown work");
            return Ok(());
        };

        if action == ResourceAction::Deleted {
            if cached.is_deleting() {
                self.cache.remove(&id);
                tracing::info!(work = %cached.metadata.name, resource_id = %id, "work deletion confirmed");
            } else {
                tracing::info!(work = %cached.metadata.name, resource_id = %id, "agent lost work, awaiting its resync");
            }
            return Ok(());
        }

        cached.status = reported.status;
        tracing::debug!(work = %cached.metadata.name, resource_id = %id, "status updated");
        self.cache.upsert(cached);
        Ok(())
    }
}

fn spec_event(action: EventAction) -> EventType {
    EventType::new(bundle_data_type(), SubResource::Spec, action)
}

fn bump(bundle: &mut ManifestBundle) -> Result<()> {
    let next = bundle.version_number()? + 1;
    bundle.metadata.resource_version = next.to_string();
    Ok(())
}

fn new_uid() -> String {
    use rand::Rng;
    hex::encode(rand::thread_rng().gen::<[u8; 16]>())
}
