//! The source side: publishes desired state, receives observed status.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use driftsync_core::codec::identity_attributes;
use driftsync_core::{
    keys, CodecRegistry, DataType, Envelope, EventAction, EventType, ResourceObject, SubResource,
};

use crate::config::SyncConfig;
use crate::dispatch::KeyedDispatcher;
use crate::error::Result;
use crate::handler::{
    default_status_hash, ListOptions, Lister, ResourceAction, ResourceHandler, StatusHashFn,
};
use crate::resync::{
    stale_resources, unknown_entries, ResourceVersionList, ResyncTracker, StatusHashList,
};
use crate::subscription::{self, EventSink};
use crate::tracker::{Admission, VersionTracker};
use crate::transport::Transport;

/// Client for the side holding authoritative desired state.
pub struct SourceClient<R: ResourceObject> {
    source_id: String,
    transport: Arc<dyn Transport>,
    codecs: CodecRegistry<R>,
    lister: Arc<dyn Lister<R>>,
    status_hash: StatusHashFn<R>,
    tracker: Arc<VersionTracker>,
    resyncs: ResyncTracker,
    config: SyncConfig,
}

impl<R: ResourceObject> SourceClient<R> {
    /// Create a source client.
    ///
    /// `lister` serves the source's current resources; its cached statuses
    /// are what inbound status events are compared against.
    pub fn new(
        source_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        codecs: CodecRegistry<R>,
        lister: Arc<dyn Lister<R>>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            transport,
            codecs,
            lister,
            status_hash: default_status_hash(),
            tracker: Arc::new(VersionTracker::new()),
            resyncs: ResyncTracker::new(),
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Override how status hashes are computed.
    pub fn with_status_hash(mut self, status_hash: StatusHashFn<R>) -> Self {
        self.status_hash = status_hash;
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Encode and send a resource.
    ///
    /// Fails with `InvalidResourceVersion` if the resource version is not a
    /// base-10 integer, or with the codec's error; nothing is sent then.
    pub async fn publish(&self, event_type: &EventType, resource: &R) -> Result<()> {
        let version = resource.version_number()?;
        let mut envelope = self.codecs.encode(&self.source_id, event_type, resource)?;
        identity_attributes(&mut envelope, resource.uid(), version, resource.cluster_name());

        tracing::debug!(
            event_type = %envelope.event_type,
            resource_id = %resource.uid(),
            resource_version = version,
            cluster = %resource.cluster_name(),
            deleting = resource.is_deleting(),
            "publishing spec"
        );
        self.transport.send(envelope).await
    }

    /// Ask every agent holding resources of this type for changed status.
    ///
    /// Sends one request per cluster, each carrying the status hashes the
    /// source holds for that cluster. With no resources at all, broadcasts
    /// an empty request. Responses arrive as ordinary status events.
    pub async fn resync(&self, data_type: &DataType) -> Result<()> {
        let resources = self.lister.list(&ListOptions::new(data_type.clone()))?;
        let clusters: BTreeSet<&str> = resources.iter().map(|r| r.cluster_name()).collect();

        if clusters.is_empty() {
            self.resyncs.start(data_type, "");
            return self.send_status_resync(data_type, None).await;
        }
        for cluster in clusters {
            self.resync_cluster(data_type, cluster).await?;
        }
        Ok(())
    }

    /// Status resync for a single cluster.
    pub async fn resync_cluster(&self, data_type: &DataType, cluster: &str) -> Result<()> {
        self.resyncs.start(data_type, cluster);
        self.send_status_resync(data_type, Some(cluster)).await
    }

    async fn send_status_resync(&self, data_type: &DataType, cluster: Option<&str>) -> Result<()> {
        let resources = match cluster {
            Some(cluster) => self
                .lister
                .list(&ListOptions::new(data_type.clone()).cluster(cluster))?,
            None => Vec::new(),
        };
        let status_hash = &self.status_hash;
        let hashes = StatusHashList::from_resources(&resources, |r| status_hash(r))?;

        let event_type = EventType::new(
            data_type.clone(),
            SubResource::Status,
            EventAction::resync_request(),
        );
        let mut envelope = Envelope::new(&event_type, &self.source_id)?.payload(hashes.to_payload()?);
        if let Some(cluster) = cluster {
            envelope.set_attribute(keys::CLUSTER_NAME, cluster);
        }

        tracing::debug!(
            data_type = %data_type,
            cluster = cluster.unwrap_or("*"),
            hashes = hashes.status_hashes.len(),
            "requesting status resync"
        );
        self.transport.send(envelope).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Consume agent events until `cancel` fires.
    ///
    /// Answers spec resync requests and hands status updates to `handler`,
    /// one resource at a time per identity. Resyncs every registered data
    /// type on start and after a reconnect.
    pub async fn subscribe(
        &self,
        cancel: CancellationToken,
        handler: Option<Arc<dyn ResourceHandler<R>>>,
    ) -> Result<()> {
        let sink = SourceSink {
            client: self,
            handler,
        };
        subscription::run(&sink, self.transport.as_ref(), &self.config, &cancel).await
    }

    async fn resync_all(&self) {
        let data_types: Vec<DataType> = self.codecs.data_types().cloned().collect();
        for data_type in data_types {
            if let Err(e) = self.resync(&data_type).await {
                tracing::warn!(data_type = %data_type, error = %e, "status resync failed");
            }
        }
    }

    async fn retry_expired_resyncs(&self) {
        for request in self.resyncs.expired(self.config.resync_timeout) {
            let cluster = (!request.cluster.is_empty()).then_some(request.cluster.as_str());
            if request.attempts > self.config.resync_retries {
                tracing::warn!(
                    data_type = %request.data_type,
                    cluster = cluster.unwrap_or("*"),
                    attempts = request.attempts,
                    "status resync got no response"
                );
                continue;
            }
            let attempt = self.resyncs.retry(&request);
            tracing::info!(
                data_type = %request.data_type,
                cluster = cluster.unwrap_or("*"),
                attempt,
                "status resync timed out, retrying"
            );
            if let Err(e) = self.send_status_resync(&request.data_type, cluster).await {
                tracing::warn!(data_type = %request.data_type, error = %e, "status resync retry failed");
            }
        }
    }

    async fn handle_envelope(
        &self,
        envelope: Envelope,
        dispatcher: &KeyedDispatcher,
        handler: Option<&Arc<dyn ResourceHandler<R>>>,
    ) {
        if let Some(target) = envelope.get(keys::ORIGINAL_SOURCE).map(|v| v.as_text()) {
            if !target.is_empty() && target != self.source_id {
                tracing::debug!(target = %target, "dropping event addressed to another source");
                return;
            }
        }

        let event_type = match envelope.parsed_type() {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(event_type = %envelope.event_type, error = %e, "dropping event");
                return;
            }
        };
        if !self.codecs.contains(&event_type.data_type) {
            tracing::debug!(data_type = %event_type.data_type, "dropping event for unregistered data type");
            return;
        }

        match (event_type.sub_resource, event_type.is_resync()) {
            (SubResource::Spec, true) => self.answer_spec_resync(&envelope, &event_type.data_type).await,
            (SubResource::Status, false) => self.handle_status(envelope, dispatcher, handler),
            _ => {
                tracing::debug!(event_type = %envelope.event_type, "dropping event not meant for a source")
            }
        }
    }

    /// Send every resource the agent lacks or holds at an older version.
    async fn answer_spec_resync(&self, envelope: &Envelope, data_type: &DataType) {
        let Some(cluster) = envelope.cluster_name() else {
            tracing::warn!(data_type = %data_type, "spec resync request without cluster name");
            return;
        };
        let held = match ResourceVersionList::from_envelope(envelope) {
            Ok(held) => held,
            Err(e) => {
                tracing::warn!(cluster = %cluster, error = %e, "dropping spec resync request");
                return;
            }
        };
        let resources = match self
            .lister
            .list(&ListOptions::new(data_type.clone()).cluster(cluster.as_str()))
        {
            Ok(resources) => resources,
            Err(e) => {
                tracing::warn!(cluster = %cluster, error = %e, "cannot list resources for spec resync");
                return;
            }
        };

        // The agent garbage-collects on its own; the source never deletes on
        // the strength of a resync list.
        for unknown in unknown_entries(&held, &resources) {
            tracing::debug!(resource_id = %unknown, cluster = %cluster, "agent holds unknown resource, ignoring");
        }

        let held_ids: HashSet<&str> = held
            .resource_versions
            .iter()
            .map(|v| v.resource_id.as_str())
            .collect();
        let response = EventType::new(
            data_type.clone(),
            SubResource::Spec,
            EventAction::resync_response(),
        );

        let stale = stale_resources(&held, &resources);
        tracing::debug!(
            cluster = %cluster,
            held = held.resource_versions.len(),
            stale = stale.len(),
            "answering spec resync"
        );
        for resource in stale {
            if resource.is_deleting() && !held_ids.contains(resource.uid()) {
                continue;
            }
            if let Err(e) = self.publish(&response, resource).await {
                tracing::warn!(resource_id = %resource.uid(), error = %e, "resync publish failed");
            }
        }
    }

    fn handle_status(
        &self,
        envelope: Envelope,
        dispatcher: &KeyedDispatcher,
        handler: Option<&Arc<dyn ResourceHandler<R>>>,
    ) {
        let cluster = envelope.cluster_name().unwrap_or_default();
        let resource = match self.codecs.decode(&envelope) {
            Ok(resource) => resource,
            Err(e) => {
                tracing::debug!(event_type = %envelope.event_type, error = %e, "dropping undecodable status");
                return;
            }
        };
        if let Ok(event_type) = envelope.parsed_type() {
            self.resyncs.complete(&event_type.data_type, &cluster);
        }

        let id = resource.uid().to_string();
        let version = match resource.version_number() {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(resource_id = %id, error = %e, "dropping status");
                return;
            }
        };
        let sequence = envelope.get(keys::SEQUENCE_ID).and_then(|v| v.as_int());

        let tracker = self.tracker.clone();
        let lister = self.lister.clone();
        let status_hash = self.status_hash.clone();
        let handler = handler.cloned();
        let key = id.clone();

        dispatcher.dispatch(&key, async move {
            let hash = match status_hash(&resource) {
                Ok(hash) => hash,
                Err(e) => {
                    tracing::warn!(resource_id = %id, error = %e, "cannot hash status");
                    return;
                }
            };
            let deleting = resource.is_deleting();
            let cached = lister.get(&id);

            if !deleting {
                if let Some(cached) = &cached {
                    if status_hash(cached).ok() == Some(hash) {
                        tracing::debug!(resource_id = %id, resource_version = version, "status no change");
                        tracker.record_status(&id, version, sequence, hash, false);
                        return;
                    }
                }
            }

            match tracker.admit_status(&id, version, sequence, &hash, deleting) {
                Admission::Accept => {}
                admission => {
                    tracing::debug!(resource_id = %id, resource_version = version, ?admission, "dropping status");
                    return;
                }
            }

            let action = if deleting {
                ResourceAction::Deleted
            } else if cached.is_some() || tracker.contains(&id) {
                ResourceAction::Modified
            } else {
                ResourceAction::Added
            };

            if let Some(handler) = handler {
                if let Err(e) = handler.handle(action, resource).await {
                    tracing::warn!(resource_id = %id, ?action, error = %e, "status handler failed");
                    return;
                }
            }
            tracker.record_status(&id, version, sequence, hash, deleting);
        });
    }
}

struct SourceSink<'a, R: ResourceObject> {
    client: &'a SourceClient<R>,
    handler: Option<Arc<dyn ResourceHandler<R>>>,
}

#[async_trait]
impl<'a, R: ResourceObject> EventSink for SourceSink<'a, R> {
    async fn on_connected(&self) {
        self.client.resync_all().await;
    }

    async fn on_event(&self, envelope: Envelope, dispatcher: &KeyedDispatcher) {
        self.client
            .handle_envelope(envelope, dispatcher, self.handler.as_ref())
            .await;
    }

    async fn on_tick(&self) {
        self.client.retry_expired_resyncs().await;
    }
}
