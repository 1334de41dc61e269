//! cluster.toml declared-spec parser.
//!
//! Besides the explicit `[[resources]]`, every declared instance group
//! expands into a launch-configuration task and an autoscaling-group task
//! that links to it, so node groups converge through the same engine.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::resource::{Tags, Value, kinds};
use crate::task::{Lifecycle, Task};
use crate::types::InstanceGroupSpec;

/// Tag placed on every resource owned by a cluster.
pub const CLUSTER_TAG: &str = "KubernetesCluster";

/// Errors raised while loading or interpreting a cluster spec.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cluster spec: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render cluster spec: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration {value:?} for {field}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("resource {resource:?} field {field:?}: {reason}")]
    InvalidProperty {
        resource: String,
        field: String,
        reason: String,
    },

    #[error("invalid cluster spec: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster: ClusterSection,
    #[serde(default)]
    pub instance_groups: Vec<InstanceGroupSpec>,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    #[serde(default)]
    pub rolling_update: RollingUpdateSection,
    #[serde(default)]
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
}

/// One declared task as written in the spec file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub properties: toml::Table,
    #[serde(default)]
    pub no_dependencies: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingUpdateSection {
    pub master_interval: String,
    pub node_interval: String,
    pub bastion_interval: String,
    pub validation_retries: u32,
}

impl Default for RollingUpdateSection {
    fn default() -> Self {
        Self {
            master_interval: "5m".to_string(),
            node_interval: "2m".to_string(),
            bastion_interval: "5m".to_string(),
            validation_retries: 8,
        }
    }
}

impl RollingUpdateSection {
    pub fn master_interval(&self) -> ConfigResult<Duration> {
        duration_field("rolling_update.master_interval", &self.master_interval)
    }

    pub fn node_interval(&self) -> ConfigResult<Duration> {
        duration_field("rolling_update.node_interval", &self.node_interval)
    }

    pub fn bastion_interval(&self) -> ConfigResult<Duration> {
        duration_field("rolling_update.bastion_interval", &self.bastion_interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay: String,
    pub max_delay: String,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: "1s".to_string(),
            max_delay: "30s".to_string(),
        }
    }
}

impl RetrySection {
    pub fn base_delay(&self) -> ConfigResult<Duration> {
        duration_field("retry.base_delay", &self.base_delay)
    }

    pub fn max_delay(&self) -> ConfigResult<Duration> {
        duration_field("retry.max_delay", &self.max_delay)
    }
}

impl ClusterConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: ClusterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject specs the engine could never converge.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cluster.name.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster.name is required".to_string()));
        }

        let mut seen = HashSet::new();
        for ig in &self.instance_groups {
            if !seen.insert(ig.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate instance group {:?}",
                    ig.name
                )));
            }
            let (min, max) = ig.size_bounds();
            if min > max {
                return Err(ConfigError::Invalid(format!(
                    "instance group {:?}: min_size {min} exceeds max_size {max}",
                    ig.name
                )));
            }
        }

        self.rolling_update.master_interval()?;
        self.rolling_update.node_interval()?;
        self.rolling_update.bastion_interval()?;
        self.retry.base_delay()?;
        self.retry.max_delay()?;
        Ok(())
    }

    /// Tags identifying resources owned by this cluster.
    pub fn cluster_tags(&self) -> Tags {
        let mut tags = self.cluster.tags.clone();
        tags.insert(CLUSTER_TAG.to_string(), self.cluster.name.clone());
        tags
    }

    /// All declared tasks: explicit resources followed by instance-group tasks.
    pub fn tasks(&self) -> ConfigResult<Vec<Task>> {
        let tags = self.cluster_tags();
        let mut tasks = Vec::new();

        for decl in &self.resources {
            let mut builder = Task::builder(&decl.kind, &decl.name)
                .lifecycle(decl.lifecycle)
                .tags(&tags);
            for (field, raw) in &decl.properties {
                let value = convert_value(raw).map_err(|reason| ConfigError::InvalidProperty {
                    resource: decl.name.clone(),
                    field: field.clone(),
                    reason,
                })?;
                builder = builder.property(field, value);
            }
            if decl.no_dependencies {
                builder = builder.no_dependencies();
            }
            tasks.push(builder.build());
        }

        for ig in &self.instance_groups {
            tasks.extend(self.instance_group_tasks(ig, &tags));
        }

        Ok(tasks)
    }

    fn instance_group_tasks(&self, ig: &InstanceGroupSpec, tags: &Tags) -> [Task; 2] {
        let group_name = ig.live_group_name(&self.cluster.name);
        let launch_config_name =
            format!("{group_name}-{}", launch_fingerprint(&ig.image, &ig.machine_type));
        let (min, max) = ig.size_bounds();

        let launch_config = Task::builder(kinds::LAUNCH_CONFIGURATION, &launch_config_name)
            .tags(tags)
            .property("image", ig.image.as_str())
            .property("machine_type", ig.machine_type.as_str())
            .build();

        let group = Task::builder(kinds::AUTOSCALING_GROUP, &group_name)
            .tags(tags)
            .tag("InstanceGroup", &ig.name)
            .link("launch_configuration", &launch_config_name)
            .property("role", ig.role.label())
            .property("min_size", i64::from(min))
            .property("max_size", i64::from(max))
            .property(
                "zones",
                Value::List(ig.zones.iter().map(|z| Value::from(z.as_str())).collect()),
            )
            .build();

        [launch_config, group]
    }
}

/// Short stable hash of what a launch configuration boots.
fn launch_fingerprint(image: &str, machine_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.as_bytes());
    hasher.update(b"\n");
    hasher.update(machine_type.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..8].to_string()
}

/// Convert a TOML value; `{ link = "name" }` becomes a task reference.
fn convert_value(raw: &toml::Value) -> Result<Value, String> {
    match raw {
        toml::Value::String(s) => Ok(Value::Str(s.clone())),
        toml::Value::Integer(i) => Ok(Value::Int(*i)),
        toml::Value::Boolean(b) => Ok(Value::Bool(*b)),
        toml::Value::Array(items) => items
            .iter()
            .map(convert_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        toml::Value::Table(table) => {
            if table.len() == 1 {
                if let Some(target) = table.get("link") {
                    return target
                        .as_str()
                        .map(|t| Value::Link(t.to_string()))
                        .ok_or_else(|| "link target must be a string".to_string());
                }
            }
            table
                .iter()
                .map(|(k, v)| convert_value(v).map(|v| (k.clone(), v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Value::Map)
        }
        toml::Value::Float(_) => Err("floating point values are not supported".to_string()),
        toml::Value::Datetime(_) => Err("datetime values are not supported".to_string()),
    }
}

fn duration_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

/// Parse `"500ms"`, `"30s"`, `"5m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return scaled(mins, 60);
    }
    if let Some(hours) = s.strip_suffix('h') {
        return scaled(hours, 3600);
    }
    None
}

/// `value * unit` seconds, `None` on a bad number or overflow.
fn scaled(value: &str, unit: u64) -> Option<Duration> {
    value
        .parse::<u64>()
        .ok()
        .and_then(|v| v.checked_mul(unit))
        .map(Duration::from_secs)
}
