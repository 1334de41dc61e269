use anyhow::Context as _;
use gridform_rollout::{RollingUpdate, RollingUpdateConfig};

use super::Context;
use super::rolling_update::select_groups;

pub async fn run(ctx: &Context, name: &str, yes: bool) -> anyhow::Result<()> {
    let cluster = &ctx.config.cluster.name;
    let declared = select_groups(&ctx.config.instance_groups, &[name.to_string()])?;
    let cloud = ctx.cloud.clone();
    let mut config = RollingUpdateConfig::new(cluster);
    config.cloud_only = true;
    let rollout = RollingUpdate::new(cloud.clone(), cloud.clone(), cloud, config);

    let groups = rollout
        .discover(&declared, &ctx.config.cluster_tags(), false)
        .await?;
    let group = groups
        .get(name)
        .with_context(|| format!("instance group {name:?} has no live autoscaling group"))?;

    let instances = group.ready.len() + group.need_update.len();
    println!(
        "{name}: autoscaling group {} with {instances} instance(s), launch configuration {}",
        group.live.name, group.launch_configuration
    );
    if !yes {
        println!();
        println!("Must specify --yes to delete");
        return Ok(());
    }

    group.delete(ctx.cloud.as_ref()).await?;
    println!("Deleted instance group {name}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gridform_core::{Cloud, ClusterConfig, NodeObserver, kinds};
    use gridform_engine::{Executor, RetryPolicy};
    use gridform_state::LocalCloud;

    use super::*;

    const SPEC: &str = r#"
[cluster]
name = "example.com"

[[instance_groups]]
name = "master-a"
role = "master"
machine_type = "m5.large"
image = "ami-1"

[[instance_groups]]
name = "nodes"
role = "node"
machine_type = "m5.large"
image = "ami-1"
min_size = 2
max_size = 2
"#;

    async fn converged() -> Context {
        let config = ClusterConfig::from_toml_str(SPEC).unwrap();
        let cloud = Arc::new(LocalCloud::open_in_memory().unwrap());
        Executor::new(cloud.clone(), RetryPolicy::no_retry())
            .apply(config.tasks().unwrap(), false)
            .await
            .unwrap();
        Context { config, cloud }
    }

    #[tokio::test]
    async fn deletes_only_with_yes() {
        let ctx = converged().await;

        run(&ctx, "nodes", false).await.unwrap();
        assert_eq!(ctx.cloud.list_nodes().await.unwrap().len(), 3);

        run(&ctx, "nodes", true).await.unwrap();
        assert_eq!(ctx.cloud.list_nodes().await.unwrap().len(), 1);
        let live = ctx
            .cloud
            .find(kinds::AUTOSCALING_GROUP, "nodes.example.com")
            .await
            .unwrap();
        assert!(live.is_none());

        // Once gone there is nothing left to delete.
        assert!(run(&ctx, "nodes", true).await.is_err());
    }

    #[tokio::test]
    async fn undeclared_group_is_refused() {
        let ctx = converged().await;
        let err = run(&ctx, "zzz", true).await.unwrap_err();
        assert!(err.to_string().contains("zzz"));
    }
}
