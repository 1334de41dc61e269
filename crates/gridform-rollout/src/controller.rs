//! Rolling update controller — drives each instance group through
//! `Pending → InProgress → Converged | Failed`.
//!
//! ```text
//!   control plane ──► one group at a time, stop at the first failure
//!   bastions      ──► one group at a time
//!   workers       ──► one task per group, all at once
//!
//!   per instance:  cordon ─► terminate ─► sleep ─► validate (up to R+1 tries,
//!                                                   sleeping between tries)
//! ```
//!
//! Within a group instances are replaced strictly one after another. Every
//! group runs on its own task and hands its [`GroupOutcome`] back through
//! its join handle, so nothing is shared between concurrent groups and a
//! panicking group is reported as failed instead of unwinding the run.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gridform_core::{
    Cloud, ClusterValidator, InstanceGroupRole, InstanceGroupSpec, NodeObserver, Resource, Tags,
    kinds,
};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RollingUpdateConfig;
use crate::discovery::{DiscoveredGroups, discover};
use crate::error::{RolloutError, RolloutResult};
use crate::group::{CloudInstance, CloudInstanceGroup};

/// Lifecycle of one group within a rolling update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPhase {
    /// Not started. Groups stay here when an earlier control-plane group fails.
    Pending,
    InProgress,
    Converged,
    Failed,
}

impl fmt::Display for GroupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            GroupPhase::Pending => "Pending",
            GroupPhase::InProgress => "InProgress",
            GroupPhase::Converged => "Converged",
            GroupPhase::Failed => "Failed",
        })
    }
}

/// Emitted on every phase transition when a progress channel is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseChange {
    pub group: String,
    pub phase: GroupPhase,
}

/// Final state of one group.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub group: String,
    pub role: InstanceGroupRole,
    pub phase: GroupPhase,
    /// Instances terminated and (unless cloud-only) validated.
    pub replaced: usize,
    pub error: Option<RolloutError>,
}

impl GroupOutcome {
    fn pending(group: &CloudInstanceGroup) -> Self {
        Self {
            group: group.name().to_string(),
            role: group.role(),
            phase: GroupPhase::Pending,
            replaced: 0,
            error: None,
        }
    }
}

/// Outcomes in phase order: control plane, bastions, then workers, each by name.
#[derive(Debug, Clone, Default)]
pub struct RolloutReport {
    pub outcomes: Vec<GroupOutcome>,
}

impl RolloutReport {
    pub fn outcome(&self, group: &str) -> Option<&GroupOutcome> {
        self.outcomes.iter().find(|o| o.group == group)
    }

    pub fn replaced(&self) -> usize {
        self.outcomes.iter().map(|o| o.replaced).sum()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }

    /// The first failure in phase order, or the report itself.
    pub fn into_result(mut self) -> RolloutResult<Self> {
        match self.outcomes.iter_mut().find_map(|o| o.error.take()) {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Replaces the instances of discovered groups.
#[derive(Clone)]
pub struct RollingUpdate {
    cloud: Arc<dyn Cloud>,
    nodes: Arc<dyn NodeObserver>,
    validator: Arc<dyn ClusterValidator>,
    config: RollingUpdateConfig,
    shutdown: Option<watch::Receiver<bool>>,
    progress: Option<mpsc::UnboundedSender<PhaseChange>>,
}

impl RollingUpdate {
    pub fn new(
        cloud: Arc<dyn Cloud>,
        nodes: Arc<dyn NodeObserver>,
        validator: Arc<dyn ClusterValidator>,
        config: RollingUpdateConfig,
    ) -> Self {
        Self {
            cloud,
            nodes,
            validator,
            config,
            shutdown: None,
            progress: None,
        }
    }

    /// Stop at the next replacement step or validation poll once `shutdown`
    /// reads `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<PhaseChange>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &RollingUpdateConfig {
        &self.config
    }

    /// Observe the cluster's nodes and discover the live groups.
    ///
    /// Failing to list nodes is fatal unless the update is cloud-only, in
    /// which case no node is linked.
    pub async fn discover(
        &self,
        declared: &[InstanceGroupSpec],
        cluster_tags: &Tags,
        warn_unmatched: bool,
    ) -> RolloutResult<DiscoveredGroups> {
        let nodes = if self.config.cloud_only {
            Vec::new()
        } else {
            self.nodes
                .list_nodes()
                .await
                .map_err(RolloutError::ListNodes)?
        };
        discover(
            self.cloud.as_ref(),
            &self.config.cluster_name,
            cluster_tags,
            declared,
            &nodes,
            warn_unmatched,
        )
        .await
    }

    /// Roll every group once over the given discovery snapshot.
    pub async fn run(&self, groups: DiscoveredGroups) -> RolloutReport {
        let mut masters = Vec::new();
        let mut bastions = Vec::new();
        let mut workers = Vec::new();
        for group in groups.into_values() {
            match group.role() {
                InstanceGroupRole::Master => masters.push(group),
                InstanceGroupRole::Bastion => bastions.push(group),
                InstanceGroupRole::Node => workers.push(group),
            }
        }

        info!(
            cluster = %self.config.cluster_name,
            masters = masters.len(),
            bastions = bastions.len(),
            workers = workers.len(),
            force = self.config.force,
            cloud_only = self.config.cloud_only,
            "rolling update starting"
        );

        let mut report = RolloutReport::default();

        // ── Control plane ──
        let mut masters = masters.into_iter();
        while let Some(group) = masters.next() {
            let outcome = self.run_isolated(group).await;
            if outcome.error.is_some() {
                error!(
                    group = %outcome.group,
                    "control-plane group failed, not starting remaining groups"
                );
                report.outcomes.push(outcome);
                report.outcomes.extend(
                    masters
                        .chain(bastions)
                        .chain(workers)
                        .map(|g| GroupOutcome::pending(&g)),
                );
                return report;
            }
            report.outcomes.push(outcome);
        }

        // ── Bastions ──
        for group in bastions {
            report.outcomes.push(self.run_isolated(group).await);
        }

        // ── Workers ──
        let handles: Vec<_> = workers.into_iter().map(|g| self.spawn_group(g)).collect();
        for (name, role, handle) in handles {
            report.outcomes.push(self.join_group(name, role, handle).await);
        }

        info!(
            replaced = report.replaced(),
            success = report.is_success(),
            "rolling update finished"
        );
        report
    }

    /// Roll one group on its own task and wait for it.
    async fn run_isolated(&self, group: CloudInstanceGroup) -> GroupOutcome {
        let (name, role, handle) = self.spawn_group(group);
        self.join_group(name, role, handle).await
    }

    fn spawn_group(
        &self,
        group: CloudInstanceGroup,
    ) -> (String, InstanceGroupRole, JoinHandle<GroupOutcome>) {
        let name = group.name().to_string();
        let role = group.role();
        let this = self.clone();
        let handle = tokio::spawn(async move { this.update_group(&group).await });
        (name, role, handle)
    }

    /// Wait for a spawned group. A panic or abort becomes a failed outcome.
    async fn join_group(
        &self,
        name: String,
        role: InstanceGroupRole,
        handle: JoinHandle<GroupOutcome>,
    ) -> GroupOutcome {
        let join_err = match handle.await {
            Ok(outcome) => return outcome,
            Err(join_err) => join_err,
        };
        let message = if join_err.is_panic() {
            panic_message(join_err.into_panic())
        } else {
            join_err.to_string()
        };
        error!(group = %name, %message, "group update task died");
        self.transition(&name, GroupPhase::Failed);
        GroupOutcome {
            group: name.clone(),
            role,
            phase: GroupPhase::Failed,
            replaced: 0,
            error: Some(RolloutError::Panicked {
                group: name,
                message,
            }),
        }
    }

    async fn update_group(&self, group: &CloudInstanceGroup) -> GroupOutcome {
        let name = group.name();
        let mut outcome = GroupOutcome::pending(group);

        let targets = group.targets(self.config.force);
        if targets.is_empty() {
            info!(group = %name, "no instances need replacement");
            outcome.phase = GroupPhase::Converged;
            self.transition(name, GroupPhase::Converged);
            return outcome;
        }

        let interval = self.config.interval_for(group.role());
        outcome.phase = GroupPhase::InProgress;
        self.transition(name, GroupPhase::InProgress);
        info!(
            group = %name,
            role = %group.role(),
            instances = targets.len(),
            interval_secs = interval.as_secs(),
            "rolling group"
        );

        for instance in targets {
            if let Err(err) = self.replace_instance(group, instance, interval).await {
                error!(
                    group = %name,
                    instance = %instance.id,
                    replaced = outcome.replaced,
                    error = %err,
                    "group failed"
                );
                outcome.phase = GroupPhase::Failed;
                outcome.error = Some(err);
                self.transition(name, GroupPhase::Failed);
                return outcome;
            }
            outcome.replaced += 1;
        }

        info!(group = %name, replaced = outcome.replaced, "group converged");
        outcome.phase = GroupPhase::Converged;
        self.transition(name, GroupPhase::Converged);
        outcome
    }

    async fn replace_instance(
        &self,
        group: &CloudInstanceGroup,
        instance: &CloudInstance,
        interval: Duration,
    ) -> RolloutResult<()> {
        let name = group.name();
        self.check_cancelled(name)?;

        if !self.config.cloud_only {
            match &instance.node {
                Some(node) => match self.nodes.cordon(&node.name).await {
                    Ok(()) => info!(
                        group = %name,
                        instance = %instance.id,
                        node = %node.name,
                        "node cordoned"
                    ),
                    Err(err) => warn!(
                        group = %name,
                        instance = %instance.id,
                        node = %node.name,
                        error = %err,
                        "cordon failed, replacing anyway"
                    ),
                },
                None => debug!(
                    group = %name,
                    instance = %instance.id,
                    "no cluster node, skipping cordon"
                ),
            }
        }

        let mut resource = Resource::new(kinds::INSTANCE, &instance.id);
        resource.id = Some(instance.id.clone());
        self.cloud
            .delete(&resource)
            .await
            .map_err(|source| RolloutError::Terminate {
                group: name.to_string(),
                instance: instance.id.clone(),
                source,
            })?;
        info!(group = %name, instance = %instance.id, "instance terminated");

        tokio::time::sleep(interval).await;

        if self.config.cloud_only {
            return Ok(());
        }
        self.validate_cluster(name, interval).await
    }

    /// Poll the validator up to `validation_retries + 1` times.
    async fn validate_cluster(&self, group: &str, interval: Duration) -> RolloutResult<()> {
        let attempts = self.config.validation_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.check_cancelled(group)?;
            match self.validator.validate(&self.config.cluster_name).await {
                Ok(report) => {
                    info!(%group, attempt, summary = %report.summary(), "cluster validated");
                    return Ok(());
                }
                Err(source) if attempt >= attempts => {
                    return Err(RolloutError::ValidationFailed {
                        group: group.to_string(),
                        attempts,
                        source,
                    });
                }
                Err(err) => {
                    warn!(%group, attempt, attempts, error = %err, "cluster not yet valid");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    fn check_cancelled(&self, group: &str) -> RolloutResult<()> {
        if self.shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
            warn!(%group, "shutdown requested, stopping group");
            return Err(RolloutError::Cancelled {
                group: group.to_string(),
            });
        }
        Ok(())
    }

    fn transition(&self, group: &str, phase: GroupPhase) {
        debug!(%group, %phase, "group phase");
        if let Some(progress) = &self.progress {
            // The receiver may have gone away; progress is advisory.
            let _ = progress.send(PhaseChange {
                group: group.to_string(),
                phase,
            });
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use gridform_core::{
        CloudError, CloudResult, ClusterError, ClusterNode, ClusterResult, Delta,
        ValidationReport,
    };
    use tokio::time::Instant;

    use super::*;

    /// Cloud, node observer and validator in one, recording what it was asked
    /// to do and when.
    struct Harness {
        start: Instant,
        events: Mutex<Vec<(Duration, String)>>,
        /// Scripted validation results; validation succeeds once exhausted.
        validations: Mutex<VecDeque<bool>>,
        always_invalid: bool,
        fail_terminate: HashSet<String>,
        panic_terminate: HashSet<String>,
        fail_cordon: bool,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                events: Mutex::new(Vec::new()),
                validations: Mutex::new(VecDeque::new()),
                always_invalid: false,
                fail_terminate: HashSet::new(),
                panic_terminate: HashSet::new(),
                fail_cordon: false,
            }
        }

        fn record(&self, event: String) {
            self.events
                .lock()
                .unwrap()
                .push((self.start.elapsed(), event));
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
        }

        fn timed(&self) -> Vec<(Duration, String)> {
            self.events.lock().unwrap().clone()
        }

        fn rollout(self: &Arc<Self>, config: RollingUpdateConfig) -> RollingUpdate {
            RollingUpdate::new(self.clone(), self.clone(), self.clone(), config)
        }
    }

    #[async_trait]
    impl Cloud for Harness {
        async fn find(&self, _kind: &str, _name: &str) -> CloudResult<Option<Resource>> {
            Ok(None)
        }
        async fn create(&self, resource: &Resource) -> CloudResult<Resource> {
            Ok(resource.clone())
        }
        async fn update(&self, resource: &Resource, _delta: &Delta) -> CloudResult<Resource> {
            Ok(resource.clone())
        }
        async fn delete(&self, resource: &Resource) -> CloudResult<()> {
            self.record(format!("terminate {}", resource.name));
            if self.panic_terminate.contains(&resource.name) {
                panic!("cloud client blew up on {}", resource.name);
            }
            if self.fail_terminate.contains(&resource.name) {
                return Err(CloudError::PermissionDenied("terminate".into()));
            }
            Ok(())
        }
        async fn list_by_tag(&self, _tags: &Tags) -> CloudResult<Vec<Resource>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl NodeObserver for Harness {
        async fn list_nodes(&self) -> ClusterResult<Vec<ClusterNode>> {
            Ok(Vec::new())
        }
        async fn cordon(&self, node_name: &str) -> ClusterResult<()> {
            self.record(format!("cordon {node_name}"));
            if self.fail_cordon {
                return Err(ClusterError::Unreachable("api down".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ClusterValidator for Harness {
        async fn validate(&self, cluster_name: &str) -> ClusterResult<ValidationReport> {
            self.record("validate".to_string());
            let ok = !self.always_invalid
                && self.validations.lock().unwrap().pop_front().unwrap_or(true);
            if ok {
                Ok(ValidationReport::default())
            } else {
                Err(ClusterError::NotReady {
                    cluster: cluster_name.to_string(),
                    detail: "nodes not ready".to_string(),
                })
            }
        }
    }

    const CURRENT: &str = "lc-current";

    /// A group whose instances are `(id, stale)`; each has a node `node-{id}`.
    fn group(
        name: &str,
        role: InstanceGroupRole,
        instances: &[(&str, bool)],
    ) -> CloudInstanceGroup {
        let spec = InstanceGroupSpec {
            name: name.to_string(),
            role,
            machine_type: "m5.large".to_string(),
            image: "ami-1".to_string(),
            min_size: None,
            max_size: None,
            zones: Vec::new(),
        };
        let instances = instances
            .iter()
            .map(|(id, stale)| CloudInstance {
                id: id.to_string(),
                launch_configuration: Some((if *stale { "lc-old" } else { CURRENT }).to_string()),
                node: Some(ClusterNode {
                    name: format!("node-{id}"),
                    external_id: id.to_string(),
                    role,
                    ready: true,
                    unschedulable: false,
                }),
            })
            .collect();
        CloudInstanceGroup::new(
            spec,
            Resource::new(kinds::AUTOSCALING_GROUP, name),
            CURRENT.to_string(),
            instances,
        )
    }

    fn groups(list: Vec<CloudInstanceGroup>) -> DiscoveredGroups {
        list.into_iter().map(|g| (g.name().to_string(), g)).collect::<BTreeMap<_, _>>()
    }

    fn config() -> RollingUpdateConfig {
        RollingUpdateConfig::new("example.com")
    }

    #[tokio::test(start_paused = true)]
    async fn forced_replace_rides_out_flaky_validation() {
        let harness = Arc::new(Harness::new());
        harness.validations.lock().unwrap().extend([false, false]);
        let mut cfg = config();
        cfg.force = true;

        let report = harness
            .rollout(cfg)
            .run(groups(vec![group("nodes", InstanceGroupRole::Node, &[("i-1", false)])]))
            .await;

        let outcome = report.outcome("nodes").unwrap();
        assert_eq!(outcome.phase, GroupPhase::Converged);
        assert_eq!(outcome.replaced, 1);

        let two = Duration::from_secs(120);
        assert_eq!(
            harness.timed(),
            vec![
                (Duration::ZERO, "cordon node-i-1".to_string()),
                (Duration::ZERO, "terminate i-1".to_string()),
                (two, "validate".to_string()),
                (two * 2, "validate".to_string()),
                (two * 3, "validate".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn validation_gives_up_after_retries_plus_one() {
        let harness = Arc::new(Harness {
            always_invalid: true,
            ..Harness::new()
        });
        let mut cfg = config();
        cfg.validation_retries = 3;

        let nodes = group("nodes", InstanceGroupRole::Node, &[("i-1", true), ("i-2", true)]);
        let report = harness
            .rollout(cfg)
            .run(groups(vec![nodes]))
            .await;

        let validations = harness.events().iter().filter(|e| *e == "validate").count();
        assert_eq!(validations, 4);
        // The second instance is never touched.
        assert!(!harness.events().contains(&"terminate i-2".to_string()));

        let outcome = report.outcome("nodes").unwrap();
        assert_eq!(outcome.phase, GroupPhase::Failed);
        assert_eq!(outcome.replaced, 0);
        match report.into_result() {
            Err(RolloutError::ValidationFailed { group, attempts, .. }) => {
                assert_eq!(group, "nodes");
                assert_eq!(attempts, 4);
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_stale_and_not_forced_is_a_no_op() {
        let harness = Arc::new(Harness::new());
        let report = harness
            .rollout(config())
            .run(groups(vec![group("nodes", InstanceGroupRole::Node, &[("i-1", false)])]))
            .await;

        assert!(harness.events().is_empty());
        let outcome = report.outcome("nodes").unwrap();
        assert_eq!(outcome.phase, GroupPhase::Converged);
        assert_eq!(outcome.replaced, 0);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn control_plane_finishes_before_any_worker_starts() {
        let harness = Arc::new(Harness::new());
        let report = harness
            .rollout(config())
            .run(groups(vec![
                group("nodes-a", InstanceGroupRole::Node, &[("i-a1", true), ("i-a2", true)]),
                group("master-us-east-1a", InstanceGroupRole::Master, &[("i-m1", true)]),
                group("nodes-b", InstanceGroupRole::Node, &[("i-b1", true)]),
            ]))
            .await;
        assert!(report.is_success());
        assert_eq!(report.replaced(), 4);

        // Master: terminate at 0, validate at 5m.
        let master_done = Duration::from_secs(300);
        for (at, event) in harness.timed() {
            if event.contains("i-a") || event.contains("i-b") {
                assert!(at >= master_done, "{event} started at {at:?}");
            }
        }
        let order: Vec<_> = report.outcomes.iter().map(|o| o.group.as_str()).collect();
        assert_eq!(order, vec!["master-us-east-1a", "nodes-a", "nodes-b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_groups_run_concurrently() {
        let harness = Arc::new(Harness::new());
        harness
            .rollout(config())
            .run(groups(vec![
                group("nodes-a", InstanceGroupRole::Node, &[("i-a1", true)]),
                group("nodes-b", InstanceGroupRole::Node, &[("i-b1", true)]),
            ]))
            .await;

        let terminations: Vec<_> = harness
            .timed()
            .into_iter()
            .filter(|(_, e)| e.starts_with("terminate"))
            .collect();
        assert_eq!(terminations.len(), 2);
        assert!(terminations.iter().all(|(at, _)| *at == Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn bastions_roll_after_masters_and_before_workers() {
        let harness = Arc::new(Harness::new());
        harness
            .rollout(config())
            .run(groups(vec![
                group("bastions", InstanceGroupRole::Bastion, &[("i-b", true)]),
                group("master", InstanceGroupRole::Master, &[("i-m", true)]),
                group("nodes", InstanceGroupRole::Node, &[("i-n", true)]),
            ]))
            .await;

        let terminations: Vec<_> = harness
            .timed()
            .into_iter()
            .filter(|(_, e)| e.starts_with("terminate"))
            .collect();
        assert_eq!(
            terminations,
            vec![
                (Duration::ZERO, "terminate i-m".to_string()),
                (Duration::from_secs(300), "terminate i-b".to_string()),
                (Duration::from_secs(600), "terminate i-n".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn control_plane_failure_blocks_everything_after_it() {
        let harness = Arc::new(Harness {
            fail_terminate: HashSet::from(["i-m1".to_string()]),
            ..Harness::new()
        });
        let report = harness
            .rollout(config())
            .run(groups(vec![
                group("master-a", InstanceGroupRole::Master, &[("i-m1", true)]),
                group("master-b", InstanceGroupRole::Master, &[("i-m2", true)]),
                group("nodes", InstanceGroupRole::Node, &[("i-n1", true)]),
            ]))
            .await;

        assert_eq!(harness.events(), vec!["cordon node-i-m1", "terminate i-m1"]);
        assert_eq!(report.outcome("master-a").unwrap().phase, GroupPhase::Failed);
        assert_eq!(report.outcome("master-b").unwrap().phase, GroupPhase::Pending);
        assert_eq!(report.outcome("nodes").unwrap().phase, GroupPhase::Pending);
        assert!(matches!(
            report.into_result(),
            Err(RolloutError::Terminate { ref group, ref instance, .. })
                if group == "master-a" && instance == "i-m1"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn worker_failure_is_isolated_to_its_group() {
        let harness = Arc::new(Harness {
            fail_terminate: HashSet::from(["i-a1".to_string()]),
            ..Harness::new()
        });
        let report = harness
            .rollout(config())
            .run(groups(vec![
                group("nodes-a", InstanceGroupRole::Node, &[("i-a1", true), ("i-a2", true)]),
                group("nodes-b", InstanceGroupRole::Node, &[("i-b1", true), ("i-b2", true)]),
            ]))
            .await;

        let a = report.outcome("nodes-a").unwrap();
        assert_eq!(a.phase, GroupPhase::Failed);
        assert_eq!(a.replaced, 0);
        let b = report.outcome("nodes-b").unwrap();
        assert_eq!(b.phase, GroupPhase::Converged);
        assert_eq!(b.replaced, 2);
        assert!(!harness.events().contains(&"terminate i-a2".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn cordon_failure_does_not_stop_replacement() {
        let harness = Arc::new(Harness {
            fail_cordon: true,
            ..Harness::new()
        });
        let report = harness
            .rollout(config())
            .run(groups(vec![group("nodes", InstanceGroupRole::Node, &[("i-1", true)])]))
            .await;
        assert!(report.is_success());
        assert_eq!(harness.events(), vec!["cordon node-i-1", "terminate i-1", "validate"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cloud_only_skips_cordon_and_validation() {
        let harness = Arc::new(Harness {
            always_invalid: true,
            ..Harness::new()
        });
        let mut cfg = config();
        cfg.cloud_only = true;
        let nodes = group("nodes", InstanceGroupRole::Node, &[("i-1", true), ("i-2", true)]);
        let report = harness
            .rollout(cfg)
            .run(groups(vec![nodes]))
            .await;

        assert!(report.is_success());
        assert_eq!(
            harness.timed(),
            vec![
                (Duration::ZERO, "terminate i-1".to_string()),
                (Duration::from_secs(120), "terminate i-2".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_before_terminating() {
        let harness = Arc::new(Harness::new());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = harness
            .rollout(config())
            .with_shutdown(rx)
            .run(groups(vec![group("nodes", InstanceGroupRole::Node, &[("i-1", true)])]))
            .await;

        assert!(harness.events().is_empty());
        assert!(matches!(
            report.into_result(),
            Err(RolloutError::Cancelled { ref group }) if group == "nodes"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_worker_is_reported_not_lost() {
        let harness = Arc::new(Harness {
            panic_terminate: HashSet::from(["i-a1".to_string()]),
            ..Harness::new()
        });
        let report = harness
            .rollout(config())
            .run(groups(vec![
                group("nodes-a", InstanceGroupRole::Node, &[("i-a1", true)]),
                group("nodes-b", InstanceGroupRole::Node, &[("i-b1", true)]),
            ]))
            .await;

        let a = report.outcome("nodes-a").unwrap();
        assert_eq!(a.phase, GroupPhase::Failed);
        match &a.error {
            Some(RolloutError::Panicked { group, message }) => {
                assert_eq!(group, "nodes-a");
                assert!(message.contains("blew up"));
            }
            other => panic!("expected Panicked, got {other:?}"),
        }
        assert_eq!(report.outcome("nodes-b").unwrap().phase, GroupPhase::Converged);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_master_still_blocks_later_groups() {
        let harness = Arc::new(Harness {
            panic_terminate: HashSet::from(["i-m1".to_string()]),
            ..Harness::new()
        });
        let report = harness
            .rollout(config())
            .run(groups(vec![
                group("master-a", InstanceGroupRole::Master, &[("i-m1", true)]),
                group("bastions", InstanceGroupRole::Bastion, &[("i-b1", true)]),
                group("nodes", InstanceGroupRole::Node, &[("i-n1", true)]),
            ]))
            .await;

        assert_eq!(harness.events(), vec!["cordon node-i-m1", "terminate i-m1"]);
        let master = report.outcome("master-a").unwrap();
        assert_eq!(master.phase, GroupPhase::Failed);
        assert!(matches!(
            &master.error,
            Some(RolloutError::Panicked { group, message })
                if group == "master-a" && message.contains("blew up")
        ));
        assert_eq!(report.outcome("bastions").unwrap().phase, GroupPhase::Pending);
        assert_eq!(report.outcome("nodes").unwrap().phase, GroupPhase::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_between_validation_polls_stops_polling() {
        let harness = Arc::new(Harness {
            always_invalid: true,
            ..Harness::new()
        });
        let (tx, rx) = watch::channel(false);
        let update = harness.rollout(config()).with_shutdown(rx);
        let nodes = groups(vec![group("nodes", InstanceGroupRole::Node, &[("i-1", true)])]);
        let run = tokio::spawn(async move { update.run(nodes).await });

        // First poll fails at 2m; the next one would be at 4m.
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        let report = run.await.unwrap();

        assert_eq!(
            harness.timed(),
            vec![
                (Duration::ZERO, "cordon node-i-1".to_string()),
                (Duration::ZERO, "terminate i-1".to_string()),
                (Duration::from_secs(120), "validate".to_string()),
            ]
        );
        let outcome = report.outcome("nodes").unwrap();
        assert_eq!(outcome.phase, GroupPhase::Failed);
        assert!(matches!(
            &outcome.error,
            Some(RolloutError::Cancelled { group }) if group == "nodes"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_reports_phase_transitions() {
        let harness = Arc::new(Harness::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        harness
            .rollout(config())
            .with_progress(tx)
            .run(groups(vec![group("nodes", InstanceGroupRole::Node, &[("i-1", true)])]))
            .await;

        let mut phases = Vec::new();
        while let Ok(change) = rx.try_recv() {
            phases.push(change.phase);
        }
        assert_eq!(phases, vec![GroupPhase::InProgress, GroupPhase::Converged]);
    }
}
