//! LocalCloud — a simulated cloud and cluster persisted in a [`StateStore`].
//!
//! Autoscaling groups behave like their hosted counterparts closely enough
//! to drive a rolling update:
//!
//! ```text
//!   create autoscaling-group ──► launch min_size instances ──► register nodes
//!   delete instance          ──► drop its node ──► launch replacement
//!                                                 (current launch config)
//! ```
//!
//! Instances are stored as their own `instance` resources. An autoscaling
//! group's `instances` property is assembled from them on every read.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use gridform_core::{
    Cloud, CloudError, CloudResult, ClusterError, ClusterNode, ClusterResult, ClusterValidator,
    Delta, InstanceGroupRole, NodeObserver, Resource, Tags, ValidationReport, Value, kinds,
};
use tracing::{debug, info};

use crate::error::StateResult;
use crate::store::StateStore;

const GROUP: &str = "group";
const LAUNCH_CONFIGURATION: &str = "launch_configuration";
const INSTANCES: &str = "instances";

#[derive(Clone)]
pub struct LocalCloud {
    store: StateStore,
    /// Serializes multi-step mutations such as "terminate and replace".
    write_lock: Arc<Mutex<()>>,
}

impl LocalCloud {
    pub fn open(path: &Path) -> StateResult<Self> {
        Ok(Self::with_store(StateStore::open(path)?))
    }

    pub fn open_in_memory() -> StateResult<Self> {
        Ok(Self::with_store(StateStore::open_in_memory()?))
    }

    pub fn with_store(store: StateStore) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Flip a node's readiness. Lets callers simulate an unhealthy cluster.
    pub fn set_node_ready(&self, node_name: &str, ready: bool) -> ClusterResult<()> {
        let _guard = self.lock();
        let mut node = self
            .store
            .get_node(node_name)?
            .ok_or_else(|| ClusterError::NodeNotFound(node_name.to_string()))?;
        node.ready = ready;
        self.store.put_node(&node)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Fill in an autoscaling group's live `instances` list.
    fn hydrate(&self, mut resource: Resource) -> CloudResult<Resource> {
        if resource.kind != kinds::AUTOSCALING_GROUP {
            return Ok(resource);
        }
        let members: Vec<Value> = self
            .members(&resource.name)?
            .into_iter()
            .map(|instance| {
                let mut entry = BTreeMap::new();
                entry.insert("id".to_string(), Value::Str(instance.name.clone()));
                if let Some(lc) = instance.property(LAUNCH_CONFIGURATION) {
                    entry.insert(LAUNCH_CONFIGURATION.to_string(), lc.clone());
                }
                Value::Map(entry)
            })
            .collect();
        resource
            .properties
            .insert(INSTANCES.to_string(), Value::List(members));
        Ok(resource)
    }

    fn members(&self, group: &str) -> CloudResult<Vec<Resource>> {
        Ok(self
            .store
            .list_resources_of_kind(kinds::INSTANCE)?
            .into_iter()
            .filter(|i| i.property(GROUP).and_then(Value::as_str) == Some(group))
            .collect())
    }

    fn find_sync(&self, kind: &str, name: &str) -> CloudResult<Option<Resource>> {
        self.store
            .get_resource(kind, name)?
            .map(|r| self.hydrate(r))
            .transpose()
    }

    fn list_by_tag_sync(&self, tags: &Tags) -> CloudResult<Vec<Resource>> {
        self.store
            .list_resources()?
            .into_iter()
            .filter(|r| r.has_tags(tags))
            .map(|r| self.hydrate(r))
            .collect()
    }

    // ── Writes ─────────────────────────────────────────────────────

    fn create_sync(&self, resource: &Resource) -> CloudResult<Resource> {
        let _guard = self.lock();
        if self.store.get_resource(&resource.kind, &resource.name)?.is_some() {
            return Err(CloudError::Conflict(format!("{} already exists", resource.key())));
        }

        let mut created = resource.clone();
        created.properties.remove(INSTANCES);
        let seq = self.store.next_seq(&resource.kind)?;
        created.id = Some(format!("{}-{seq:06}", id_prefix(&resource.kind)));
        self.store.put_resource(&created)?;
        info!(key = %created.key(), id = ?created.id, "resource created");

        if created.kind == kinds::AUTOSCALING_GROUP {
            let (min, _) = size_bounds(&created)?;
            for _ in 0..min {
                self.launch_instance(&created)?;
            }
        }
        self.hydrate(created)
    }

    fn update_sync(&self, resource: &Resource, delta: &Delta) -> CloudResult<Resource> {
        let _guard = self.lock();
        let mut stored = self
            .store
            .get_resource(&resource.kind, &resource.name)?
            .ok_or_else(|| CloudError::NotFound(resource.key()))?;
        delta.apply_to(&mut stored.properties);
        delta.apply_tags(&mut stored.tags);
        stored.properties.remove(INSTANCES);
        self.store.put_resource(&stored)?;
        debug!(key = %stored.key(), %delta, "resource updated");

        // Growing min_size launches the shortfall; existing members keep
        // the launch configuration they were started with but pick up
        // the group's tags.
        if stored.kind == kinds::AUTOSCALING_GROUP {
            if !delta.tags.is_empty() {
                for mut instance in self.members(&stored.name)? {
                    delta.apply_tags(&mut instance.tags);
                    self.store.put_resource(&instance)?;
                }
            }
            let (min, _) = size_bounds(&stored)?;
            let have = self.members(&stored.name)?.len() as i64;
            for _ in have..min {
                self.launch_instance(&stored)?;
            }
        }
        self.hydrate(stored)
    }

    fn delete_sync(&self, resource: &Resource) -> CloudResult<()> {
        let _guard = self.lock();
        let stored = self
            .store
            .get_resource(&resource.kind, &resource.name)?
            .ok_or_else(|| CloudError::NotFound(resource.key()))?;

        match stored.kind.as_str() {
            kinds::INSTANCE => {
                self.terminate_instance(&stored)?;
                let group = stored.property(GROUP).and_then(Value::as_str);
                if let Some(group) = group {
                    if let Some(asg) = self.store.get_resource(kinds::AUTOSCALING_GROUP, group)? {
                        let replacement = self.launch_instance(&asg)?;
                        info!(
                            %group,
                            terminated = %stored.name,
                            %replacement,
                            "instance replaced"
                        );
                    }
                }
            }
            kinds::AUTOSCALING_GROUP => {
                for instance in self.members(&stored.name)? {
                    self.terminate_instance(&instance)?;
                }
                self.store.delete_resource(&stored.kind, &stored.name)?;
                info!(key = %stored.key(), "autoscaling group deleted");
            }
            _ => {
                self.store.delete_resource(&stored.kind, &stored.name)?;
                info!(key = %stored.key(), "resource deleted");
            }
        }
        Ok(())
    }

    /// Start one instance bound to the group's current launch configuration
    /// and register its node. Returns the new instance id.
    fn launch_instance(&self, asg: &Resource) -> CloudResult<String> {
        let launch_configuration = asg
            .property(LAUNCH_CONFIGURATION)
            .and_then(Value::as_name)
            .ok_or_else(|| {
                CloudError::InvalidDeclaration(format!(
                    "{} has no launch_configuration",
                    asg.key()
                ))
            })?
            .to_string();
        let role = match asg.property("role").and_then(Value::as_str) {
            Some("master") => Some(InstanceGroupRole::Master),
            Some("bastion") => None,
            _ => Some(InstanceGroupRole::Node),
        };

        let seq = self.store.next_seq(kinds::INSTANCE)?;
        let id = format!("i-{seq:08x}");
        let mut instance = Resource::new(kinds::INSTANCE, &id);
        instance.id = Some(id.clone());
        instance.tags = asg.tags.clone();
        instance
            .properties
            .insert(GROUP.to_string(), Value::Str(asg.name.clone()));
        instance.properties.insert(
            LAUNCH_CONFIGURATION.to_string(),
            Value::Str(launch_configuration),
        );
        self.store.put_resource(&instance)?;

        // Bastions are not cluster members.
        if let Some(role) = role {
            self.store.put_node(&ClusterNode {
                name: format!("ip-10-0-{}-{}", (seq >> 8) & 0xff, seq & 0xff),
                external_id: id.clone(),
                role,
                ready: true,
                unschedulable: false,
            })?;
        }
        debug!(group = %asg.name, instance = %id, "instance launched");
        Ok(id)
    }

    fn terminate_instance(&self, instance: &Resource) -> CloudResult<()> {
        let node = self.store.remove_instance(&instance.name)?;
        debug!(instance = %instance.name, ?node, "instance terminated");
        Ok(())
    }
}

fn id_prefix(kind: &str) -> &str {
    match kind {
        kinds::AUTOSCALING_GROUP => "asg",
        kinds::LAUNCH_CONFIGURATION => "lc",
        kinds::NETWORK => "vpc",
        other => other,
    }
}

fn size_bounds(asg: &Resource) -> CloudResult<(i64, i64)> {
    let read = |field: &str| {
        asg.property(field).and_then(Value::as_int).ok_or_else(|| {
            CloudError::InvalidDeclaration(format!("{} has no integer {field}", asg.key()))
        })
    };
    let (min, max) = (read("min_size")?, read("max_size")?);
    if min < 0 || min > max {
        return Err(CloudError::InvalidDeclaration(format!(
            "{}: min_size {min} / max_size {max}",
            asg.key()
        )));
    }
    Ok((min, max))
}

#[async_trait]
impl Cloud for LocalCloud {
    async fn find(&self, kind: &str, name: &str) -> CloudResult<Option<Resource>> {
        self.find_sync(kind, name)
    }

    async fn create(&self, resource: &Resource) -> CloudResult<Resource> {
        self.create_sync(resource)
    }

    async fn update(&self, resource: &Resource, delta: &Delta) -> CloudResult<Resource> {
        self.update_sync(resource, delta)
    }

    async fn delete(&self, resource: &Resource) -> CloudResult<()> {
        self.delete_sync(resource)
    }

    async fn list_by_tag(&self, tags: &Tags) -> CloudResult<Vec<Resource>> {
        self.list_by_tag_sync(tags)
    }
}

#[async_trait]
impl NodeObserver for LocalCloud {
    async fn list_nodes(&self) -> ClusterResult<Vec<ClusterNode>> {
        Ok(self.store.list_nodes()?)
    }

    async fn cordon(&self, node_name: &str) -> ClusterResult<()> {
        let _guard = self.lock();
        let mut node = self
            .store
            .get_node(node_name)?
            .ok_or_else(|| ClusterError::NodeNotFound(node_name.to_string()))?;
        node.unschedulable = true;
        self.store.put_node(&node)?;
        debug!(node = %node_name, "node cordoned");
        Ok(())
    }
}

#[async_trait]
impl ClusterValidator for LocalCloud {
    async fn validate(&self, cluster_name: &str) -> ClusterResult<ValidationReport> {
        let nodes = self.store.list_nodes()?;
        let report = ValidationReport::from_nodes(cluster_name, &nodes);
        if report.is_healthy() {
            Ok(report)
        } else {
            Err(ClusterError::NotReady {
                cluster: cluster_name.to_string(),
                detail: report.summary(),
            })
        }
    }
}
