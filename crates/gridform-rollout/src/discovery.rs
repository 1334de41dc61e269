//! Cloud instance group discovery.
//!
//! Joins declared instance groups to the live autoscaling groups carrying
//! the cluster's tags, by the live naming convention
//! (`{group}.masters.{cluster}` for control plane, `{group}.{cluster}`
//! otherwise), and links each live instance to the node reporting its id.

use std::collections::{BTreeMap, HashMap};

use gridform_core::{Cloud, ClusterNode, InstanceGroupSpec, Resource, Tags, Value, kinds};
use tracing::{debug, info, warn};

use crate::error::{RolloutError, RolloutResult};
use crate::group::{CloudInstance, CloudInstanceGroup};

/// Discovered groups keyed by declared group name.
pub type DiscoveredGroups = BTreeMap<String, CloudInstanceGroup>;

/// Match live autoscaling groups to `declared` groups.
///
/// A live group claimed by two declared groups is fatal. A live group that
/// no declared group claims is skipped, with a warning unless
/// `warn_unmatched` is false.
pub async fn discover(
    cloud: &dyn Cloud,
    cluster_name: &str,
    cluster_tags: &Tags,
    declared: &[InstanceGroupSpec],
    nodes: &[ClusterNode],
    warn_unmatched: bool,
) -> RolloutResult<DiscoveredGroups> {
    let live_groups: Vec<Resource> = cloud
        .list_by_tag(cluster_tags)
        .await?
        .into_iter()
        .filter(|r| r.kind == kinds::AUTOSCALING_GROUP)
        .collect();

    let nodes_by_instance: HashMap<&str, &ClusterNode> = nodes
        .iter()
        .map(|n| (n.external_id.as_str(), n))
        .collect();

    let mut groups = DiscoveredGroups::new();
    for live in live_groups {
        let claims: Vec<&InstanceGroupSpec> = declared
            .iter()
            .filter(|spec| spec.live_group_name(cluster_name) == live.name)
            .collect();

        let spec = match claims.as_slice() {
            [] => {
                if warn_unmatched {
                    warn!(
                        live_group = %live.name,
                        "found autoscaling group with no matching instance group"
                    );
                }
                continue;
            }
            [spec] => (*spec).clone(),
            many => {
                return Err(RolloutError::AmbiguousGroup {
                    live_group: live.name.clone(),
                    groups: many.iter().map(|s| s.name.clone()).collect(),
                });
            }
        };

        let group = join_group(spec, live, &nodes_by_instance)?;
        debug!(
            group = %group.name(),
            ready = group.ready.len(),
            need_update = group.need_update.len(),
            "instance group discovered"
        );
        groups.insert(group.name().to_string(), group);
    }

    info!(
        cluster = %cluster_name,
        declared = declared.len(),
        matched = groups.len(),
        "instance group discovery complete"
    );
    Ok(groups)
}

fn join_group(
    spec: InstanceGroupSpec,
    live: Resource,
    nodes_by_instance: &HashMap<&str, &ClusterNode>,
) -> RolloutResult<CloudInstanceGroup> {
    let invalid = |reason: &str| RolloutError::InvalidGroup {
        live_group: live.name.clone(),
        reason: reason.to_string(),
    };

    let launch_configuration = live
        .property("launch_configuration")
        .and_then(Value::as_name)
        .ok_or_else(|| invalid("no launch_configuration"))?
        .to_string();

    let mut instances = Vec::new();
    if let Some(members) = live.property("instances") {
        let members = members
            .as_list()
            .ok_or_else(|| invalid("instances is not a list"))?;
        for member in members {
            let fields = member
                .as_map()
                .ok_or_else(|| invalid("instance entry is not a map"))?;
            let id = fields
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("instance entry has no id"))?;
            instances.push(CloudInstance {
                id: id.to_string(),
                launch_configuration: fields
                    .get("launch_configuration")
                    .and_then(Value::as_name)
                    .map(str::to_string),
                node: nodes_by_instance.get(id).map(|n| (*n).clone()),
            });
        }
    }

    Ok(CloudInstanceGroup::new(spec, live, launch_configuration, instances))
}
