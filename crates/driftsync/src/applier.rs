//! Agent side: applies received bundles to the local store.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use driftsync_core::{
    bundle_data_type, BundleSpec, BundleStatus, Condition, ConditionStatus, DeleteOption,
    EventAction, EventType, Manifest, ManifestBundle, ManifestCondition, ManifestIdentifier,
    PropagationPolicy, ResourceObject, SubResource, UpdateStrategy,
};
use driftsync_store::{Object, ObjectKey, StoreExt};
use driftsync_sync::{AgentClient, Lister, ResourceAction, ResourceHandler};
use driftsync_work::ApplyCache;

use crate::cache::ResourceCache;
use crate::error::Result;

/// Condition type reported per bundle and per manifest.
pub const CONDITION_APPLIED: &str = "Applied";
/// Condition type reported for read-only manifests.
pub const CONDITION_AVAILABLE: &str = "Available";

/// Applies each bundle's manifests through an [`ApplyCache`] and reports
/// the outcome as bundle status.
///
/// Objects dropped from a bundle, or belonging to a deleted bundle, are
/// deleted unless the bundle's delete option orphans them.
pub struct BundleApplier {
    client: Arc<AgentClient<ManifestBundle>>,
    bundles: Arc<ResourceCache<ManifestBundle>>,
    objects: ApplyCache,
}

impl BundleApplier {
    /// `bundles` must be the lister `client` was built with.
    pub fn new(
        client: Arc<AgentClient<ManifestBundle>>,
        bundles: Arc<ResourceCache<ManifestBundle>>,
        objects: ApplyCache,
    ) -> Self {
        Self {
            client,
            bundles,
            objects,
        }
    }

    pub fn bundles(&self) -> &Arc<ResourceCache<ManifestBundle>> {
        &self.bundles
    }

    async fn reconcile(&self, mut bundle: ManifestBundle) -> Result<()> {
        let previous = self.bundles.get(bundle.uid());

        let mut resource_status = Vec::with_capacity(bundle.spec.manifests.len());
        let mut failed = 0usize;
        for manifest in &bundle.spec.manifests {
            let id = manifest.identifier();
            let outcome = match self.apply_manifest(manifest, strategy(&bundle.spec, &id)).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        work = %bundle.metadata.name,
                        object = ?id,
                        error = %e,
                        "apply failed"
                    );
                    condition(CONDITION_APPLIED, false, "AppliedManifestFailed", e.to_string())
                }
            };
            resource_status.push(ManifestCondition {
                resource_meta: id,
                conditions: vec![outcome],
            });
        }

        if let Some(previous) = previous {
            self.prune(&previous.spec, &bundle.spec).await;
        }

        let total = bundle.spec.manifests.len();
        let mut applied = if failed == 0 {
            condition(
                CONDITION_APPLIED,
                true,
                "AppliedManifestWorkComplete",
                format!("{total} manifests applied"),
            )
        } else {
            condition(
                CONDITION_APPLIED,
                false,
                "AppliedManifestWorkFailed",
                format!("{failed} of {total} manifests failed"),
            )
        };
        applied.observed_generation = bundle.metadata.generation;
        bundle.status = Some(BundleStatus {
            conditions: vec![applied],
            resource_status,
        });

        tracing::info!(
            work = %bundle.metadata.name,
            resource_id = %bundle.uid(),
            resource_version = %bundle.resource_version(),
            manifests = total,
            failed,
            "work applied"
        );
        self.bundles.upsert(bundle.clone());
        self.client.publish(&status_event(EventAction::update_request()), &bundle).await?;
        Ok(())
    }

    async fn apply_manifest(&self, manifest: &Manifest, strategy: UpdateStrategy) -> Result<Condition> {
        let object = Object::from_manifest(manifest)?;
        let applied = condition(CONDITION_APPLIED, true, "AppliedManifestComplete", String::new());
        match strategy {
            UpdateStrategy::ReadOnly => {
                let exists = self.objects.store().get_opt(&object.key()).await?.is_some();
                let reason = if exists { "ResourceExists" } else { "ResourceNotFound" };
                Ok(condition(CONDITION_AVAILABLE, exists, reason, String::new()))
            }
            UpdateStrategy::CreateOnly => {
                if self.objects.store().get_opt(&object.key()).await?.is_none() {
                    self.objects.apply(&object).await?;
                }
                Ok(applied)
            }
            UpdateStrategy::Update | UpdateStrategy::ServerSideApply => {
                self.objects.apply(&object).await?;
                Ok(applied)
            }
        }
    }

    /// Delete objects the previous spec applied that the current one drops.
    async fn prune(&self, previous: &BundleSpec, current: &BundleSpec) {
        let kept: HashSet<ManifestIdentifier> =
            current.manifests.iter().map(Manifest::identifier).collect();
        let dropped: Vec<&Manifest> = previous
            .manifests
            .iter()
            .filter(|m| !kept.contains(&m.identifier()))
            .collect();
        self.delete_objects(dropped, current.delete_option.as_ref()).await;
    }

    async fn remove(&self, bundle: ManifestBundle) -> Result<()> {
        match self.bundles.remove(bundle.uid()) {
            Some(held) => {
                let manifests: Vec<&Manifest> = held.spec.manifests.iter().collect();
                self.delete_objects(manifests, held.spec.delete_option.as_ref()).await;
                tracing::info!(work = %held.metadata.name, resource_id = %bundle.uid(), "work removed");
            }
            None => tracing::debug!(resource_id = %bundle.uid(), "deleting work never applied here"),
        }
        self.client.publish(&status_event(EventAction::delete_request()), &bundle).await?;
        Ok(())
    }

    async fn delete_objects(&self, manifests: Vec<&Manifest>, option: Option<&DeleteOption>) {
        for manifest in manifests {
            let id = manifest.identifier();
            if orphaned(option, &id) {
                tracing::debug!(object = ?id, "orphaning");
                continue;
            }
            if let Err(e) = self.objects.delete(&ObjectKey::from(&id)).await {
                tracing::warn!(object = ?id, error = %e, "delete failed");
            }
        }
    }
}

#[async_trait]
impl ResourceHandler<ManifestBundle> for BundleApplier {
    async fn handle(&self, action: ResourceAction, bundle: ManifestBundle) -> anyhow::Result<()> {
        match action {
            ResourceAction::Deleted => self.remove(bundle).await?,
            ResourceAction::Added | ResourceAction::Modified => self.reconcile(bundle).await?,
        }
        Ok(())
    }
}

fn status_event(action: EventAction) -> EventType {
    EventType::new(bundle_data_type(), SubResource::Status, action)
}

fn strategy(spec: &BundleSpec, id: &ManifestIdentifier) -> UpdateStrategy {
    spec.manifest_configs
        .iter()
        .find(|c| &c.resource_identifier == id)
        .and_then(|c| c.update_strategy)
        .unwrap_or_default()
}

fn orphaned(option: Option<&DeleteOption>, id: &ManifestIdentifier) -> bool {
    match option {
        None => false,
        Some(option) => match option.propagation_policy {
            PropagationPolicy::Foreground => false,
            PropagationPolicy::Orphan => true,
            PropagationPolicy::SelectivelyOrphan => option.selectively_orphan.contains(id),
        },
    }
}

fn condition(type_: &str, ok: bool, reason: &str, message: String) -> Condition {
    let status = if ok {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    };
    let mut condition = Condition::new(type_, status);
    condition.reason = reason.into();
    condition.message = message;
    condition
}
