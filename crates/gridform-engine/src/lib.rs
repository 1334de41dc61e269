//! gridform-engine — turns declared tasks into dependency-ordered cloud mutations.
//!
//! [`DependencyGraph`] resolves the order (fatal on cycles and unknown
//! links), [`Executor`] converges each task in turn and returns a
//! [`ChangeSummary`]. Re-applying an unchanged task set against converged
//! state yields an empty summary.

pub mod changes;
pub mod error;
pub mod executor;
pub mod graph;
pub mod retry;

pub use changes::{Change, ChangeAction, ChangeSummary, Drift, DriftDetail};
pub use error::{EngineError, EngineResult, TaskFailure};
pub use executor::Executor;
pub use graph::DependencyGraph;
pub use retry::RetryPolicy;
