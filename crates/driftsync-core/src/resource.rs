//! The resource abstraction the protocol clients are generic over.

use crate::error::Result;
use crate::meta::ObjectMeta;
use crate::types::ContentHash;

/// A domain resource that can be synchronized.
///
/// Identity is the `uid`; ordering is the integer `resource_version`. The
/// namespace of a resource on the wire is the cluster it targets.
pub trait ResourceObject: Clone + Send + Sync + 'static {
    /// Object metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Hash of the observed status, compared during status resync.
    fn status_hash(&self) -> Result<ContentHash>;

    /// Stable identity.
    fn uid(&self) -> &str {
        &self.meta().uid
    }

    /// Target cluster.
    fn cluster_name(&self) -> &str {
        &self.meta().namespace
    }

    fn resource_version(&self) -> &str {
        &self.meta().resource_version
    }

    /// Resource version as an integer.
    fn version_number(&self) -> Result<i64> {
        self.meta().version_number()
    }

    fn deletion_timestamp(&self) -> Option<i64> {
        self.meta().deletion_timestamp
    }

    fn is_deleting(&self) -> bool {
        self.deletion_timestamp().is_some()
    }
}
