//! The agent side: receives desired state, publishes observed status.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use driftsync_core::codec::identity_attributes;
use driftsync_core::{
    deletion_envelope, keys, now_millis, CodecRegistry, ContentHash, DataType, Envelope,
    EventAction, EventType, ResourceObject, SubResource,
};

use crate::config::SyncConfig;
use crate::dispatch::KeyedDispatcher;
use crate::error::Result;
use crate::handler::{
    default_status_hash, ListOptions, Lister, ResourceAction, ResourceHandler, StatusHashFn,
};
use crate::resync::{status_drift, ResourceVersionList, ResyncTracker, StatusHashList};
use crate::subscription::{self, EventSink};
use crate::tracker::{Admission, VersionTracker};
use crate::transport::Transport;

/// Client for one cluster's agent.
pub struct AgentClient<R: ResourceObject> {
    cluster_name: String,
    transport: Arc<dyn Transport>,
    codecs: CodecRegistry<R>,
    lister: Arc<dyn Lister<R>>,
    status_hash: StatusHashFn<R>,
    tracker: Arc<VersionTracker>,
    resyncs: ResyncTracker,
    config: SyncConfig,
}

impl<R: ResourceObject> AgentClient<R> {
    /// Create an agent client.
    ///
    /// `lister` serves the resources this agent currently holds; they are
    /// fingerprinted for spec resync and compared during status resync.
    pub fn new(
        cluster_name: impl Into<String>,
        transport: Arc<dyn Transport>,
        codecs: CodecRegistry<R>,
        lister: Arc<dyn Lister<R>>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
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

    pub fn with_status_hash(mut self, status_hash: StatusHashFn<R>) -> Self {
        self.status_hash = status_hash;
        self
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish a resource's status.
    ///
    /// Skipped when the status hash equals the last one published for this
    /// resource. Each published status carries the next `sequenceid` and the
    /// id of the source the resource came from.
    pub async fn publish(&self, event_type: &EventType, resource: &R) -> Result<()> {
        self.send_status(event_type, resource, false, None).await
    }

    async fn send_status(
        &self,
        event_type: &EventType,
        resource: &R,
        force: bool,
        origin_hint: Option<&str>,
    ) -> Result<()> {
        let id = resource.uid();
        let version = resource.version_number()?;
        let hash = (self.status_hash)(resource)?;
        let mut envelope = self.codecs.encode(&self.cluster_name, event_type, resource)?;
        identity_attributes(&mut envelope, id, version, &self.cluster_name);

        let Some(sequence) = self.tracker.stamp_publish(id, hash, force) else {
            tracing::debug!(resource_id = %id, resource_version = version, "status unchanged, not publishing");
            return Ok(());
        };
        envelope.set_attribute(keys::SEQUENCE_ID, sequence);
        if let Some(origin) = self.tracker.origin(id).or_else(|| origin_hint.map(str::to_string)) {
            envelope.set_attribute(keys::ORIGINAL_SOURCE, origin);
        }

        tracing::debug!(
            event_type = %envelope.event_type,
            resource_id = %id,
            resource_version = version,
            sequence,
            "publishing status"
        );
        if let Err(e) = self.transport.send(envelope).await {
            self.tracker.clear_published(id);
            return Err(e);
        }
        Ok(())
    }

    /// Ask sources to resend spec state this agent lacks.
    ///
    /// Sends the versions of every locally held resource of the data type;
    /// an empty list asks for everything.
    pub async fn resync(&self, data_type: &DataType) -> Result<()> {
        self.resyncs.start(data_type, &self.cluster_name);
        self.send_spec_resync(data_type).await
    }

    async fn send_spec_resync(&self, data_type: &DataType) -> Result<()> {
        let resources = self
            .lister
            .list(&ListOptions::new(data_type.clone()).cluster(self.cluster_name.as_str()))?;
        let versions = ResourceVersionList::from_resources(&resources)?;

        let event_type = EventType::new(
            data_type.clone(),
            SubResource::Spec,
            EventAction::resync_request(),
        );
        let envelope = Envelope::new(&event_type, &self.cluster_name)?
            .attribute(keys::CLUSTER_NAME, self.cluster_name.as_str())
            .payload(versions.to_payload()?);

        tracing::debug!(
            data_type = %data_type,
            cluster = %self.cluster_name,
            held = versions.resource_versions.len(),
            "requesting spec resync"
        );
        self.transport.send(envelope).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Consume source events until `cancel` fires.
    ///
    /// Spec events go to `handler` one at a time per resource. After a
    /// reconnect, a spec resync is sent before anything else is dispatched.
    pub async fn subscribe(
        &self,
        cancel: CancellationToken,
        handler: Option<Arc<dyn ResourceHandler<R>>>,
    ) -> Result<()> {
        let sink = AgentSink {
            client: self,
            handler,
        };
        subscription::run(&sink, self.transport.as_ref(), &self.config, &cancel).await
    }

    async fn resync_all(&self) {
        let data_types: Vec<DataType> = self.codecs.data_types().cloned().collect();
        for data_type in data_types {
            if let Err(e) = self.resync(&data_type).await {
                tracing::warn!(data_type = %data_type, error = %e, "spec resync failed");
            }
        }
    }

    async fn retry_expired_resyncs(&self) {
        for request in self.resyncs.expired(self.config.resync_timeout) {
            if request.attempts > self.config.resync_retries {
                tracing::warn!(
                    data_type = %request.data_type,
                    attempts = request.attempts,
                    "spec resync got no response"
                );
                continue;
            }
            let attempt = self.resyncs.retry(&request);
            tracing::info!(data_type = %request.data_type, attempt, "spec resync timed out, retrying");
            if let Err(e) = self.send_spec_resync(&request.data_type).await {
                tracing::warn!(data_type = %request.data_type, error = %e, "spec resync retry failed");
            }
        }
    }

    async fn handle_envelope(
        &self,
        envelope: Envelope,
        dispatcher: &KeyedDispatcher,
        handler: Option<&Arc<dyn ResourceHandler<R>>>,
    ) {
        if let Some(cluster) = envelope.cluster_name() {
            if cluster != self.cluster_name {
                tracing::debug!(cluster = %cluster, "dropping event for another cluster");
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
            (SubResource::Spec, false) => {
                self.resyncs.complete(&event_type.data_type, &self.cluster_name);
                self.handle_spec(envelope, dispatcher, handler);
            }
            (SubResource::Status, true) => {
                self.answer_status_resync(&envelope, &event_type.data_type).await
            }
            _ => {
                tracing::debug!(event_type = %envelope.event_type, "dropping event not meant for an agent")
            }
        }
    }

    /// Republish status the source lacks or holds differently, and report
    /// tracked resources that are gone as deleted. A gone resource is
    /// reported once.
    async fn answer_status_resync(&self, envelope: &Envelope, data_type: &DataType) {
        let known = match StatusHashList::from_envelope(envelope) {
            Ok(known) => known,
            Err(e) => {
                tracing::warn!(data_type = %data_type, error = %e, "dropping status resync request");
                return;
            }
        };
        let local = match self
            .lister
            .list(&ListOptions::new(data_type.clone()).cluster(self.cluster_name.as_str()))
        {
            Ok(local) => local,
            Err(e) => {
                tracing::warn!(data_type = %data_type, error = %e, "cannot list resources for status resync");
                return;
            }
        };
        let status_hash = &self.status_hash;
        let drift = match status_drift(&known, &local, |r| status_hash(r)) {
            Ok(drift) => drift,
            Err(e) => {
                tracing::warn!(data_type = %data_type, error = %e, "cannot compare status hashes");
                return;
            }
        };

        tracing::debug!(
            data_type = %data_type,
            changed = drift.changed.len(),
            missing = drift.missing.len(),
            "answering status resync"
        );
        let response = EventType::new(
            data_type.clone(),
            SubResource::Status,
            EventAction::resync_response(),
        );
        let origin = envelope.source.as_str();

        for resource in drift.changed {
            if let Err(e) = self.send_status(&response, resource, true, Some(origin)).await {
                tracing::warn!(resource_id = %resource.uid(), error = %e, "status resync publish failed");
            }
        }

        for id in drift.missing {
            // Resources never received here are the spec channel's business.
            let Some(record) = self.tracker.get(&id) else {
                continue;
            };
            if record.deleted && record.published_hash == Some(ContentHash::ZERO) {
                continue;
            }
            if let Err(e) = self.send_deleted_status(&response, &id, record.version, origin).await {
                tracing::warn!(resource_id = %id, error = %e, "deleted status publish failed");
            }
        }
    }

    async fn send_deleted_status(
        &self,
        event_type: &EventType,
        id: &str,
        version: i64,
        origin: &str,
    ) -> Result<()> {
        let mut envelope = deletion_envelope(
            event_type,
            &self.cluster_name,
            id,
            version,
            &self.cluster_name,
            now_millis(),
        )?;
        if let Some(sequence) = self.tracker.stamp_publish(id, ContentHash::ZERO, true) {
            envelope.set_attribute(keys::SEQUENCE_ID, sequence);
        }
        let origin = self.tracker.origin(id).unwrap_or_else(|| origin.to_string());
        envelope.set_attribute(keys::ORIGINAL_SOURCE, origin);

        tracing::debug!(resource_id = %id, resource_version = version, "publishing deleted status");
        if let Err(e) = self.transport.send(envelope).await {
            self.tracker.clear_published(id);
            return Err(e);
        }
        self.tracker.record_spec(id, version, true, None);
        Ok(())
    }

    fn handle_spec(
        &self,
        envelope: Envelope,
        dispatcher: &KeyedDispatcher,
        handler: Option<&Arc<dyn ResourceHandler<R>>>,
    ) {
        let resource = match self.codecs.decode(&envelope) {
            Ok(resource) => resource,
            Err(e) => {
                tracing::debug!(event_type = %envelope.event_type, error = %e, "dropping undecodable spec");
                return;
            }
        };
        let id = resource.uid().to_string();
        let version = match resource.version_number() {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(resource_id = %id, error = %e, "dropping spec");
                return;
            }
        };
        let origin = envelope.source;

        let tracker = self.tracker.clone();
        let lister = self.lister.clone();
        let handler = handler.cloned();
        let key = id.clone();

        dispatcher.dispatch(&key, async move {
            let deleting = resource.is_deleting();
            match tracker.admit_spec(&id, version, deleting) {
                Admission::Accept => {}
                admission => {
                    tracing::debug!(resource_id = %id, resource_version = version, ?admission, "dropping spec");
                    return;
                }
            }

            let known = lister.get(&id).is_some()
                || tracker.get(&id).map_or(false, |record| record.version > 0 && !record.deleted);
            // Status published from inside the handler must find its way back.
            tracker.set_origin(&id, &origin);
            let action = if deleting {
                ResourceAction::Deleted
            } else if known {
                ResourceAction::Modified
            } else {
                ResourceAction::Added
            };

            if let Some(handler) = handler {
                if let Err(e) = handler.handle(action, resource).await {
                    tracing::warn!(resource_id = %id, ?action, error = %e, "spec handler failed");
                    return;
                }
            }
            tracker.record_spec(&id, version, deleting, Some(&origin));
        });
    }
}

struct AgentSink<'a, R: ResourceObject> {
    client: &'a AgentClient<R>,
    handler: Option<Arc<dyn ResourceHandler<R>>>,
}

#[async_trait]
impl<'a, R: ResourceObject> EventSink for AgentSink<'a, R> {
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
