//! Rolling update settings.

use std::time::Duration;

use gridform_core::InstanceGroupRole;
use gridform_core::config::{ConfigResult, RollingUpdateSection};

/// How a rolling update paces and gates instance replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingUpdateConfig {
    pub cluster_name: String,
    /// Wait after terminating a control-plane instance, and between validations.
    pub master_interval: Duration,
    pub node_interval: Duration,
    pub bastion_interval: Duration,
    /// Validation is attempted `validation_retries + 1` times per instance.
    pub validation_retries: u32,
    /// Replace instances that already run the current launch configuration.
    pub force: bool,
    /// Skip cordon and cluster validation.
    pub cloud_only: bool,
}

impl RollingUpdateConfig {
    pub fn new(cluster_name: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            master_interval: Duration::from_secs(5 * 60),
            node_interval: Duration::from_secs(2 * 60),
            bastion_interval: Duration::from_secs(5 * 60),
            validation_retries: 8,
            force: false,
            cloud_only: false,
        }
    }

    pub fn from_section(cluster_name: &str, section: &RollingUpdateSection) -> ConfigResult<Self> {
        Ok(Self {
            master_interval: section.master_interval()?,
            node_interval: section.node_interval()?,
            bastion_interval: section.bastion_interval()?,
            validation_retries: section.validation_retries,
            ..Self::new(cluster_name)
        })
    }

    pub fn interval_for(&self, role: InstanceGroupRole) -> Duration {
        match role {
            InstanceGroupRole::Master => self.master_interval,
            InstanceGroupRole::Node => self.node_interval,
            InstanceGroupRole::Bastion => self.bastion_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = RollingUpdateConfig::new("example.com");
        assert_eq!(cfg.interval_for(InstanceGroupRole::Master), Duration::from_secs(300));
        assert_eq!(cfg.interval_for(InstanceGroupRole::Node), Duration::from_secs(120));
        assert_eq!(cfg.interval_for(InstanceGroupRole::Bastion), Duration::from_secs(300));
        assert_eq!(cfg.validation_retries, 8);
        assert!(!cfg.force && !cfg.cloud_only);
    }

    #[test]
    fn from_config_section() {
        let section = RollingUpdateSection {
            master_interval: "90s".to_string(),
            node_interval: "30s".to_string(),
            bastion_interval: "1m".to_string(),
            validation_retries: 2,
        };
        let cfg = RollingUpdateConfig::from_section("example.com", &section).unwrap();
        assert_eq!(cfg.master_interval, Duration::from_secs(90));
        assert_eq!(cfg.node_interval, Duration::from_secs(30));
        assert_eq!(cfg.bastion_interval, Duration::from_secs(60));
        assert_eq!(cfg.validation_retries, 2);
    }
}
