//! What a convergence run did, or would do.

use std::fmt;

use gridform_core::Delta;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "delta", rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update(Delta),
}

/// One mutation, applied or planned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub kind: String,
    pub task: String,
    #[serde(flatten)]
    pub action: ChangeAction,
}

/// Drift reported by a task that only observes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "drift", content = "delta", rename_all = "snake_case")]
pub enum DriftDetail {
    Missing,
    Changed(Delta),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drift {
    pub kind: String,
    pub task: String,
    #[serde(flatten)]
    pub detail: DriftDetail,
}

/// Outcome of an apply or plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSummary {
    pub dry_run: bool,
    pub changes: Vec<Change>,
    pub warnings: Vec<Drift>,
}

impl ChangeSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    /// No mutations. Drift warnings do not count.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn creates(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c.action, ChangeAction::Create))
            .count()
    }

    pub fn updates(&self) -> usize {
        self.changes.len() - self.creates()
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in &self.changes {
            match &change.action {
                ChangeAction::Create => writeln!(f, "  + {}/{}", change.kind, change.task)?,
                ChangeAction::Update(delta) => {
                    writeln!(f, "  ~ {}/{}: {delta}", change.kind, change.task)?
                }
            }
        }
        for drift in &self.warnings {
            match &drift.detail {
                DriftDetail::Missing => writeln!(f, "  ! {}/{}: missing", drift.kind, drift.task)?,
                DriftDetail::Changed(delta) => {
                    writeln!(f, "  ! {}/{}: {delta}", drift.kind, drift.task)?
                }
            }
        }
        let verb = if self.dry_run { "to apply" } else { "applied" };
        write!(
            f,
            "{} to create, {} to update, {} warnings ({verb})",
            self.creates(),
            self.updates(),
            self.warnings.len()
        )
    }
}
