//! Collaborator interfaces the engine and rollout drive.
//!
//! Handles are passed explicitly (usually as `Arc<dyn Cloud>`); there is no
//! process-wide client cache, so each run owns the lifetime of its handles.

use async_trait::async_trait;

use crate::error::{CloudResult, ClusterResult};
use crate::resource::{Delta, Resource, Tags};
use crate::types::{ClusterNode, ValidationReport};

/// A live cloud back end.
#[async_trait]
pub trait Cloud: Send + Sync {
    /// Look up the object with this identity. `Ok(None)` means "must create".
    async fn find(&self, kind: &str, name: &str) -> CloudResult<Option<Resource>>;

    async fn create(&self, resource: &Resource) -> CloudResult<Resource>;

    /// Apply `delta` to the existing object described by `resource`.
    async fn update(&self, resource: &Resource, delta: &Delta) -> CloudResult<Resource>;

    async fn delete(&self, resource: &Resource) -> CloudResult<()>;

    /// Every resource whose tags include all of `tags`.
    async fn list_by_tag(&self, tags: &Tags) -> CloudResult<Vec<Resource>>;
}

/// The cluster's own view of its nodes.
#[async_trait]
pub trait NodeObserver: Send + Sync {
    async fn list_nodes(&self) -> ClusterResult<Vec<ClusterNode>>;

    /// Mark a node unschedulable.
    async fn cordon(&self, node_name: &str) -> ClusterResult<()>;
}

/// Cluster health gate. `Err` means "not yet ready, retry".
#[async_trait]
pub trait ClusterValidator: Send + Sync {
    async fn validate(&self, cluster_name: &str) -> ClusterResult<ValidationReport>;
}
