//! Seams between the clients and the application.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use driftsync_core::{ContentHash, DataType, ResourceObject};

use crate::error::Result;

/// What happened to a resource, from the receiver's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAction {
    Added,
    Modified,
    Deleted,
}

/// Consumes decoded resources.
///
/// Failures are logged by the client; they never stop the subscription.
#[async_trait]
pub trait ResourceHandler<R: Send + 'static>: Send + Sync {
    async fn handle(&self, action: ResourceAction, resource: R) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`ResourceHandler`].
pub struct FnHandler<R, F> {
    f: F,
    _resource: PhantomData<fn(R)>,
}

/// Build a handler from an async closure.
pub fn handler_fn<R, F, Fut>(f: F) -> Arc<FnHandler<R, F>>
where
    F: Fn(ResourceAction, R) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    Arc::new(FnHandler {
        f,
        _resource: PhantomData,
    })
}

#[async_trait]
impl<R, F, Fut> ResourceHandler<R> for FnHandler<R, F>
where
    R: Send + 'static,
    F: Fn(ResourceAction, R) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, action: ResourceAction, resource: R) -> anyhow::Result<()> {
        (self.f)(action, resource).await
    }
}

/// Selects resources from a lister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub data_type: DataType,
    /// Restrict to one cluster; `None` lists every cluster.
    pub cluster_name: Option<String>,
}

impl ListOptions {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            cluster_name: None,
        }
    }

    pub fn cluster(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = Some(cluster_name.into());
        self
    }
}

/// Read access to the locally held resources of one side.
pub trait Lister<R>: Send + Sync {
    fn list(&self, options: &ListOptions) -> Result<Vec<R>>;

    fn get(&self, resource_id: &str) -> Option<R>;
}

/// Computes the status hash compared during status dedup and resync.
pub type StatusHashFn<R> = Arc<dyn Fn(&R) -> driftsync_core::Result<ContentHash> + Send + Sync>;

/// The resource's own [`ResourceObject::status_hash`].
pub fn default_status_hash<R: ResourceObject>() -> StatusHashFn<R> {
    Arc::new(|r: &R| r.status_hash())
}
