pub mod apply;
pub mod delete_group;
pub mod rolling_update;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use gridform_core::ClusterConfig;
use gridform_state::LocalCloud;
use tracing::info;

/// Everything a command needs: the parsed spec and the cloud it targets.
pub struct Context {
    pub config: ClusterConfig,
    pub cloud: Arc<LocalCloud>,
}

impl Context {
    pub fn load(config_path: &Path, state_path: &Path) -> anyhow::Result<Self> {
        let config = ClusterConfig::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        let cloud = LocalCloud::open(state_path)
            .with_context(|| format!("opening local cloud at {}", state_path.display()))?;
        info!(
            cluster = %config.cluster.name,
            groups = config.instance_groups.len(),
            resources = config.resources.len(),
            state = ?state_path,
            "cluster spec loaded"
        );
        Ok(Self {
            config,
            cloud: Arc::new(cloud),
        })
    }
}
