//! Convergence executor — find, diff, render and classify, one task at a time.
//!
//! ```text
//!   tasks ──► DependencyGraph ──► for each task, in order:
//!                                   find ─► diff ─► render ─► classify
//!                                                     │
//!                                     dry run: record only
//! ```
//!
//! Tasks are applied serially so every task observes the committed state of
//! the tasks it links to. The first fatal error aborts the run; whatever was
//! already applied stays applied.

use std::future::Future;
use std::sync::Arc;

use gridform_core::{Cloud, CloudResult, Delta, Lifecycle, Resource, Task};
use tracing::{debug, info, warn};

use crate::changes::{Change, ChangeAction, ChangeSummary, Drift, DriftDetail};
use crate::error::{EngineError, EngineResult, TaskFailure};
use crate::graph::DependencyGraph;
use crate::retry::RetryPolicy;

/// Drives a task set to convergence against a cloud handle.
pub struct Executor {
    cloud: Arc<dyn Cloud>,
    policy: RetryPolicy,
}

impl Executor {
    pub fn new(cloud: Arc<dyn Cloud>, policy: RetryPolicy) -> Self {
        Self { cloud, policy }
    }

    /// Resolve and apply `tasks`.
    ///
    /// Declaration errors surface before the cloud is touched. With
    /// `dry_run` set the summary lists what would change and nothing is
    /// created or updated.
    pub async fn apply(&self, tasks: Vec<Task>, dry_run: bool) -> EngineResult<ChangeSummary> {
        let graph = DependencyGraph::build(tasks)?;
        self.apply_graph(&graph, dry_run).await
    }

    /// Apply an already-resolved graph.
    pub async fn apply_graph(
        &self,
        graph: &DependencyGraph,
        dry_run: bool,
    ) -> EngineResult<ChangeSummary> {
        let mut summary = ChangeSummary::new(dry_run);

        for task in graph.ordered() {
            self.converge(task, &mut summary)
                .await
                .map_err(|source| EngineError::Task {
                    task: task.name().to_string(),
                    kind: task.kind().to_string(),
                    source,
                })?;
        }

        info!(
            tasks = graph.len(),
            creates = summary.creates(),
            updates = summary.updates(),
            warnings = summary.warnings.len(),
            dry_run,
            "convergence complete"
        );
        Ok(summary)
    }

    async fn converge(&self, task: &Task, summary: &mut ChangeSummary) -> Result<(), TaskFailure> {
        let found = self
            .with_retry(task, "find", || self.cloud.find(task.kind(), task.name()))
            .await?;
        debug!(
            task = %task.name(),
            kind = %task.kind(),
            lifecycle = task.lifecycle().label(),
            found = found.is_some(),
            "observed"
        );

        match (task.lifecycle(), found) {
            (Lifecycle::MustExist | Lifecycle::ExistsAndValidates, None) => {
                Err(TaskFailure::Missing)
            }

            (Lifecycle::MustExist, Some(_)) => Ok(()),

            (Lifecycle::ExistsAndValidates, Some(found)) => {
                let delta = diff(task, &found);
                if delta.is_empty() {
                    Ok(())
                } else {
                    Err(TaskFailure::Mismatch(delta))
                }
            }

            (Lifecycle::WarnIfChanges, found) => {
                let detail = match found {
                    None => Some(DriftDetail::Missing),
                    Some(found) => {
                        let delta = diff(task, &found);
                        (!delta.is_empty()).then_some(DriftDetail::Changed(delta))
                    }
                };
                if let Some(detail) = detail {
                    warn!(
                        task = %task.name(),
                        kind = %task.kind(),
                        ?detail,
                        "drift detected, not changing"
                    );
                    summary.warnings.push(Drift {
                        kind: task.kind().to_string(),
                        task: task.name().to_string(),
                        detail,
                    });
                }
                Ok(())
            }

            (Lifecycle::Sync, None) => {
                if !summary.dry_run {
                    let desired = task.render();
                    let created = self
                        .with_retry(task, "create", || self.cloud.create(&desired))
                        .await?;
                    info!(task = %task.name(), kind = %task.kind(), id = ?created.id, "created");
                } else {
                    info!(task = %task.name(), kind = %task.kind(), "would create");
                }
                summary.changes.push(Change {
                    kind: task.kind().to_string(),
                    task: task.name().to_string(),
                    action: ChangeAction::Create,
                });
                Ok(())
            }

            (Lifecycle::Sync, Some(found)) => {
                let delta = diff(task, &found);
                if delta.is_empty() {
                    debug!(task = %task.name(), "up to date");
                    return Ok(());
                }
                if !summary.dry_run {
                    self.update(task, &found, &delta).await?;
                    info!(task = %task.name(), kind = %task.kind(), %delta, "updated");
                } else {
                    info!(task = %task.name(), kind = %task.kind(), %delta, "would update");
                }
                summary.changes.push(Change {
                    kind: task.kind().to_string(),
                    task: task.name().to_string(),
                    action: ChangeAction::Update(delta),
                });
                Ok(())
            }
        }
    }

    async fn update(
        &self,
        task: &Task,
        found: &Resource,
        delta: &Delta,
    ) -> Result<(), TaskFailure> {
        self.with_retry(task, "update", || self.cloud.update(found, delta))
            .await
            .map(|_| ())
    }

    /// Call `op` until it succeeds, fails fatally, or the attempt budget runs out.
    async fn with_retry<T, F, Fut>(
        &self,
        task: &Task,
        op: &'static str,
        mut call: F,
    ) -> Result<T, TaskFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    if !self.policy.should_retry(attempts) {
                        return Err(TaskFailure::RetriesExhausted { attempts, last: e });
                    }
                    let delay = self.policy.delay(attempts - 1);
                    warn!(
                        task = %task.name(),
                        op,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient cloud error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(TaskFailure::Cloud(e)),
            }
        }
    }
}

/// Declared tags and properties against what the cloud reports.
fn diff(task: &Task, found: &Resource) -> Delta {
    Delta::for_resource(task.tags(), task.properties(), found)
}
