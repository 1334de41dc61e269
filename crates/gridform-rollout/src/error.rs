//! Error types for discovery and rolling updates.

use gridform_core::{CloudError, ClusterError};
use thiserror::Error;

pub type RolloutResult<T> = Result<T, RolloutError>;

/// Every variant raised while updating a group names that group.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RolloutError {
    #[error(
        "live group {live_group:?} matches more than one declared group: {}",
        .groups.join(", ")
    )]
    AmbiguousGroup {
        live_group: String,
        groups: Vec<String>,
    },

    #[error("live group {live_group:?} is malformed: {reason}")]
    InvalidGroup { live_group: String, reason: String },

    #[error("listing cloud resources: {0}")]
    Cloud(#[from] CloudError),

    #[error("listing cluster nodes: {0}")]
    ListNodes(#[source] ClusterError),

    #[error("group {group}: terminating instance {instance}: {source}")]
    Terminate {
        group: String,
        instance: String,
        #[source]
        source: CloudError,
    },

    #[error("group {group}: cluster did not validate after {attempts} attempts: {source}")]
    ValidationFailed {
        group: String,
        attempts: u32,
        #[source]
        source: ClusterError,
    },

    #[error("group {group}: deleting {resource}: {source}")]
    Delete {
        group: String,
        resource: String,
        #[source]
        source: CloudError,
    },

    #[error("group {group}: rolling update cancelled")]
    Cancelled { group: String },

    #[error("group {group}: update task panicked: {message}")]
    Panicked { group: String, message: String },
}
