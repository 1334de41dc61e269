//! Engine error types.

use gridform_core::{CloudError, Delta};
use thiserror::Error;

/// Errors that abort a convergence run.
///
/// Declaration errors (`DuplicateTask`, `UnknownDependency`, `Cycle`) are
/// raised before any cloud call is made.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("task {task:?} depends on unknown task {missing:?}")]
    UnknownDependency { task: String, missing: String },

    #[error("dependency cycle among tasks: {}", .tasks.join(", "))]
    Cycle { tasks: Vec<String> },

    #[error("task {kind}/{task}: {source}")]
    Task {
        task: String,
        kind: String,
        #[source]
        source: TaskFailure,
    },
}

/// Why a single task could not be converged.
#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: CloudError },

    #[error("object does not exist")]
    Missing,

    #[error("object does not match declaration: {0}")]
    Mismatch(Delta),
}

pub type EngineResult<T> = Result<T, EngineError>;
