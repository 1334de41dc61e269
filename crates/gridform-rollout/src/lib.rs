//! gridform rolling updates — discovery, cordon, replace, validate.
//!
//! Replaces the instances of a cluster's instance groups after their launch
//! configuration changes, without losing the control plane.
//!
//! # Components
//!
//! - **`discovery`** — join declared groups to live autoscaling groups and
//!   split their instances into ready and needing update
//! - **`controller`** — the per-group state machine and phase ordering
//! - **`config`** — intervals, validation retries, force and cloud-only

pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod group;

pub use config::RollingUpdateConfig;
pub use controller::{GroupOutcome, GroupPhase, PhaseChange, RollingUpdate, RolloutReport};
pub use discovery::{DiscoveredGroups, discover};
pub use error::{RolloutError, RolloutResult};
pub use group::{CloudInstance, CloudInstanceGroup, GroupStatus};
