//! Declared node groups and observed cluster state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a cloud instance.
pub type InstanceId = String;

/// Role of a declared node group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceGroupRole {
    /// Control-plane nodes.
    Master,
    /// Worker nodes.
    Node,
    Bastion,
}

impl InstanceGroupRole {
    pub fn label(&self) -> &'static str {
        match self {
            InstanceGroupRole::Master => "master",
            InstanceGroupRole::Node => "node",
            InstanceGroupRole::Bastion => "bastion",
        }
    }
}

impl fmt::Display for InstanceGroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A declared set of homogeneous cluster nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceGroupSpec {
    pub name: String,
    pub role: InstanceGroupRole,
    pub machine_type: String,
    pub image: String,
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    #[serde(default)]
    pub zones: Vec<String>,
}

impl InstanceGroupSpec {
    /// Name of the live autoscaling group backing this group.
    ///
    /// Control-plane groups live at `{group}.masters.{cluster}`, everything
    /// else at `{group}.{cluster}`.
    pub fn live_group_name(&self, cluster_name: &str) -> String {
        match self.role {
            InstanceGroupRole::Master => format!("{}.masters.{}", self.name, cluster_name),
            InstanceGroupRole::Node | InstanceGroupRole::Bastion => {
                format!("{}.{}", self.name, cluster_name)
            }
        }
    }

    /// Declared `(min, max)`, defaulting to 1/1 for masters and bastions and
    /// 2/2 for nodes.
    pub fn size_bounds(&self) -> (u32, u32) {
        let default = match self.role {
            InstanceGroupRole::Node => 2,
            InstanceGroupRole::Master | InstanceGroupRole::Bastion => 1,
        };
        (
            self.min_size.unwrap_or(default),
            self.max_size.unwrap_or(default),
        )
    }
}

/// The cluster's own view of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    /// Cloud instance identity reported by the node.
    pub external_id: InstanceId,
    pub role: InstanceGroupRole,
    pub ready: bool,
    #[serde(default)]
    pub unschedulable: bool,
}

/// Result of one cluster validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub cluster_name: String,
    pub masters_ready: Vec<String>,
    pub masters_not_ready: Vec<String>,
    pub nodes_ready: Vec<String>,
    pub nodes_not_ready: Vec<String>,
}

impl ValidationReport {
    /// Build a report from observed nodes. Bastions do not register as nodes.
    pub fn from_nodes(cluster_name: &str, nodes: &[ClusterNode]) -> Self {
        let mut report = Self {
            cluster_name: cluster_name.to_string(),
            ..Default::default()
        };
        for node in nodes {
            let bucket = match (node.role, node.ready) {
                (InstanceGroupRole::Master, true) => &mut report.masters_ready,
                (InstanceGroupRole::Master, false) => &mut report.masters_not_ready,
                (_, true) => &mut report.nodes_ready,
                (_, false) => &mut report.nodes_not_ready,
            };
            bucket.push(node.name.clone());
        }
        report
    }

    /// Every observed node is ready and at least one master exists.
    pub fn is_healthy(&self) -> bool {
        !self.masters_ready.is_empty()
            && self.masters_not_ready.is_empty()
            && self.nodes_not_ready.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "masters ready {}/{}, nodes ready {}/{}",
            self.masters_ready.len(),
            self.masters_ready.len() + self.masters_not_ready.len(),
            self.nodes_ready.len(),
            self.nodes_ready.len() + self.nodes_not_ready.len(),
        )
    }
}
