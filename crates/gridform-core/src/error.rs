//! Error types reported by cloud and cluster collaborators.

use thiserror::Error;

/// Result type alias for cloud handle operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Result type alias for cluster observer and validator operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors returned by a cloud handle, classified as retryable or fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not yet consistent: {0}")]
    NotYetConsistent(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),

    #[error("conflicting external change: {0}")]
    Conflict(String),

    #[error("cloud error: {0}")]
    Internal(String),
}

impl CloudError {
    /// Rate limiting and read-after-write lag clear up on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloudError::RateLimited(_) | CloudError::NotYetConsistent(_)
        )
    }
}

/// Errors returned by the cluster node observer and validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("cluster API unreachable: {0}")]
    Unreachable(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// The cluster answered but is not healthy yet.
    #[error("cluster {cluster} not ready: {detail}")]
    NotReady { cluster: String, detail: String },
}
