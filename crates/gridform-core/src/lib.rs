//! gridform-core — shared types for the gridform convergence engine.
//!
//! Defines the declared side (tasks, instance groups, the cluster spec
//! file), the observed side (resources, cluster nodes, validation reports),
//! and the collaborator traits the engine and rollout drive:
//!
//! - [`Cloud`] — find / create / update / delete / list-by-tag
//! - [`NodeObserver`] — list and cordon cluster nodes
//! - [`ClusterValidator`] — cluster health gate

pub mod cloud;
pub mod config;
pub mod error;
pub mod resource;
pub mod task;
pub mod types;

pub use cloud::{Cloud, ClusterValidator, NodeObserver};
pub use config::{ClusterConfig, ConfigError, ConfigResult};
pub use error::{CloudError, CloudResult, ClusterError, ClusterResult};
pub use resource::{
    Delta, FieldChange, Properties, Resource, ResourceKind, TagChange, Tags, Value, kinds,
};
pub use task::{Lifecycle, Task, TaskBuilder};
pub use types::*;
