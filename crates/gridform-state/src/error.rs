//! Error types for the local cloud.

use gridform_core::{CloudError, ClusterError};
use thiserror::Error;

/// Result type alias for local cloud store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

impl From<StateError> for CloudError {
    fn from(err: StateError) -> Self {
        CloudError::Internal(err.to_string())
    }
}

impl From<StateError> for ClusterError {
    fn from(err: StateError) -> Self {
        ClusterError::Unreachable(err.to_string())
    }
}
