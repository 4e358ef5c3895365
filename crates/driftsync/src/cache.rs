//! In-memory resource cache backing the clients' [`Lister`] seam.

use std::collections::HashMap;
use std::sync::RwLock;

use driftsync_core::ResourceObject;
use driftsync_sync::{ListOptions, Lister};

/// Thread-safe map of resources by uid.
///
/// The cache holds a single resource kind, so list options only select by
/// cluster. Listing is ordered by uid.
pub struct ResourceCache<R> {
    items: RwLock<HashMap<String, R>>,
}

impl<R: ResourceObject> ResourceCache<R> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace by uid.
    pub fn upsert(&self, resource: R) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(resource.uid().to_string(), resource);
    }

    pub fn remove(&self, uid: &str) -> Option<R> {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(uid)
    }

    /// Resources targeted at `cluster`, ordered by uid.
    pub fn for_cluster(&self, cluster: &str) -> Vec<R> {
        self.select(Some(cluster))
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, cluster: Option<&str>) -> Vec<R> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        let mut selected: Vec<R> = items
            .values()
            .filter(|r| cluster.map_or(true, |c| r.cluster_name() == c))
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.uid().cmp(b.uid()));
        selected
    }
}

impl<R: ResourceObject> Default for ResourceCache<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ResourceObject> Lister<R> for ResourceCache<R> {
    fn list(&self, options: &ListOptions) -> driftsync_sync::Result<Vec<R>> {
        Ok(self.select(options.cluster_name.as_deref()))
    }

    fn get(&self, id: &str) -> Option<R> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}
