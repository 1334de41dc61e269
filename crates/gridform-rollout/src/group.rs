//! Live instance groups as seen at discovery time.

use std::fmt;

use gridform_core::{
    Cloud, CloudError, ClusterNode, InstanceGroupRole, InstanceGroupSpec, InstanceId, Resource,
    kinds,
};
use serde::Serialize;
use tracing::info;

use crate::error::{RolloutError, RolloutResult};

/// One live instance of a group.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudInstance {
    pub id: InstanceId,
    /// Launch configuration the instance was started from, if reported.
    pub launch_configuration: Option<String>,
    /// The cluster's view of this instance, when a node reports its id.
    pub node: Option<ClusterNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Ready,
    NeedsUpdate,
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupStatus::Ready => f.write_str("Ready"),
            GroupStatus::NeedsUpdate => f.write_str("NeedsUpdate"),
        }
    }
}

/// A declared instance group joined to the live autoscaling group backing it.
///
/// The `ready`/`need_update` partition is a snapshot; it is not recomputed
/// while an update runs.
#[derive(Debug, Clone)]
pub struct CloudInstanceGroup {
    pub spec: InstanceGroupSpec,
    pub live: Resource,
    pub launch_configuration: String,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub ready: Vec<CloudInstance>,
    pub need_update: Vec<CloudInstance>,
}

impl CloudInstanceGroup {
    /// Split `instances` by whether they run `launch_configuration`.
    pub fn new(
        spec: InstanceGroupSpec,
        live: Resource,
        launch_configuration: String,
        instances: Vec<CloudInstance>,
    ) -> Self {
        let current = Some(launch_configuration.as_str());
        let (ready, need_update): (Vec<_>, Vec<_>) = instances
            .into_iter()
            .partition(|i| i.launch_configuration.as_deref() == current);
        let min_size = live.property("min_size").and_then(|v| v.as_int());
        let max_size = live.property("max_size").and_then(|v| v.as_int());
        Self {
            spec,
            live,
            launch_configuration,
            min_size,
            max_size,
            ready,
            need_update,
        }
    }

    /// Declared group name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn role(&self) -> InstanceGroupRole {
        self.spec.role
    }

    pub fn status(&self) -> GroupStatus {
        if self.need_update.is_empty() {
            GroupStatus::Ready
        } else {
            GroupStatus::NeedsUpdate
        }
    }

    /// Instances to replace: stale ones, then current ones when forced.
    pub fn targets(&self, force: bool) -> Vec<&CloudInstance> {
        let mut targets: Vec<&CloudInstance> = self.need_update.iter().collect();
        if force {
            targets.extend(self.ready.iter());
        }
        targets
    }

    /// Instances that have a matching cluster node.
    pub fn node_count(&self) -> usize {
        self.ready
            .iter()
            .chain(self.need_update.iter())
            .filter(|i| i.node.is_some())
            .count()
    }

    /// Delete the autoscaling group, then its launch configuration.
    ///
    /// Launch configurations still bound to stale instances are removed
    /// too; those may already be gone.
    pub async fn delete(&self, cloud: &dyn Cloud) -> RolloutResult<()> {
        let fail = |resource: &Resource, source| RolloutError::Delete {
            group: self.name().to_string(),
            resource: resource.key(),
            source,
        };

        info!(group = %self.name(), live_group = %self.live.name, "deleting autoscaling group");
        cloud.delete(&self.live).await.map_err(|e| fail(&self.live, e))?;

        let current = Resource::new(kinds::LAUNCH_CONFIGURATION, &self.launch_configuration);
        info!(
            group = %self.name(),
            launch_configuration = %current.name,
            "deleting launch configuration"
        );
        cloud.delete(&current).await.map_err(|e| fail(&current, e))?;

        let mut stale: Vec<&str> = self
            .need_update
            .iter()
            .filter_map(|i| i.launch_configuration.as_deref())
            .collect();
        stale.sort_unstable();
        stale.dedup();
        for name in stale {
            let old = Resource::new(kinds::LAUNCH_CONFIGURATION, name);
            match cloud.delete(&old).await {
                Ok(()) | Err(CloudError::NotFound(_)) => {}
                Err(e) => return Err(fail(&old, e)),
            }
        }
        Ok(())
    }
}
