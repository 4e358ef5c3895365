//! Assembled source and agent processes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use driftsync_core::{CodecRegistry, Manifest, ManifestBundle, ManifestBundleCodec};
use driftsync_store::Store;
use driftsync_sync::{AgentClient, ResourceHandler, SourceClient, Transport};
use driftsync_work::{ApplyCache, SharedOptions, WorkBuilder};

use crate::applier::BundleApplier;
use crate::cache::ResourceCache;
use crate::config::Config;
use crate::distributor::{DistributeReport, WorkDistributor};
use crate::error::Result;

/// Codec registry with the manifest bundle codec.
pub fn bundle_codecs() -> Result<CodecRegistry<ManifestBundle>> {
    Ok(CodecRegistry::new().with(Arc::new(ManifestBundleCodec::new()))?)
}

/// The source: publishes work, collects status.
pub struct SourceNode {
    client: Arc<SourceClient<ManifestBundle>>,
    distributor: Arc<WorkDistributor>,
}

impl SourceNode {
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let cache = Arc::new(ResourceCache::new());
        let client = Arc::new(
            SourceClient::new(&config.source_id, transport, bundle_codecs()?, cache.clone())
                .with_config(config.sync.clone()),
        );
        let builder = WorkBuilder::new(config.work.clone())?;
        let distributor = Arc::new(WorkDistributor::new(builder, client.clone(), cache));
        Ok(Self {
            client,
            distributor,
        })
    }

    pub fn client(&self) -> &Arc<SourceClient<ManifestBundle>> {
        &self.client
    }

    /// Published bundles, with the latest reported status.
    pub fn bundles(&self) -> &Arc<ResourceCache<ManifestBundle>> {
        self.distributor.cache()
    }

    /// See [`WorkDistributor::distribute`].
    pub async fn distribute(
        &self,
        cluster: &str,
        manifests: Vec<Manifest>,
        options: &SharedOptions,
    ) -> Result<DistributeReport> {
        self.distributor.distribute(cluster, manifests, options).await
    }

    /// Consume agent traffic until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let handler: Arc<dyn ResourceHandler<ManifestBundle>> = self.distributor.clone();
        self.client.subscribe(cancel, Some(handler)).await?;
        Ok(())
    }
}

/// An agent: applies work for one cluster, reports status.
pub struct AgentNode {
    client: Arc<AgentClient<ManifestBundle>>,
    applier: Arc<BundleApplier>,
}

impl AgentNode {
    pub fn new(config: &Config, transport: Arc<dyn Transport>, store: Arc<dyn Store>) -> Result<Self> {
        let bundles = Arc::new(ResourceCache::new());
        let client = Arc::new(
            AgentClient::new(&config.cluster_name, transport, bundle_codecs()?, bundles.clone())
                .with_config(config.sync.clone()),
        );
        let objects = ApplyCache::new(store, config.apply.clone());
        let applier = Arc::new(BundleApplier::new(client.clone(), bundles, objects));
        Ok(Self { client, applier })
    }

    pub fn client(&self) -> &Arc<AgentClient<ManifestBundle>> {
        &self.client
    }

    /// Bundles currently applied on this cluster.
    pub fn bundles(&self) -> &Arc<ResourceCache<ManifestBundle>> {
        self.applier.bundles()
    }

    /// Consume source traffic until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let handler: Arc<dyn ResourceHandler<ManifestBundle>> = self.applier.clone();
        self.client.subscribe(cancel, Some(handler)).await?;
        Ok(())
    }
}
