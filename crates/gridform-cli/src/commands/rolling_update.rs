use anyhow::bail;
use gridform_core::InstanceGroupSpec;
use gridform_rollout::{DiscoveredGroups, GroupStatus, RollingUpdate, RollingUpdateConfig};
use tokio::sync::watch;
use tracing::warn;

use super::Context;
use crate::RollingUpdateArgs;

pub async fn run(ctx: &Context, args: RollingUpdateArgs) -> anyhow::Result<()> {
    let cluster = &ctx.config.cluster.name;
    let mut config = RollingUpdateConfig::from_section(cluster, &ctx.config.rolling_update)?;
    if let Some(interval) = args.master_interval {
        config.master_interval = interval;
    }
    if let Some(interval) = args.node_interval {
        config.node_interval = interval;
    }
    if let Some(interval) = args.bastion_interval {
        config.bastion_interval = interval;
    }
    if let Some(retries) = args.validation_retries {
        config.validation_retries = retries;
    }
    config.force = args.force;
    config.cloud_only = args.cloud_only;

    let declared = select_groups(&ctx.config.instance_groups, &args.instance_groups)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cloud = ctx.cloud.clone();
    let rollout = RollingUpdate::new(cloud.clone(), cloud.clone(), cloud, config)
        .with_shutdown(shutdown_rx);

    // Unmatched live groups are expected when only some groups were selected.
    let warn_unmatched = args.instance_groups.is_empty();
    let groups = rollout
        .discover(&declared, &ctx.config.cluster_tags(), warn_unmatched)
        .await?;

    print_groups(&groups, args.cloud_only);

    let needs_update = groups
        .values()
        .any(|g| g.status() == GroupStatus::NeedsUpdate);
    if !needs_update && !args.force {
        println!();
        println!("No rolling-update required");
        return Ok(());
    }
    if !args.yes {
        println!();
        println!("Must specify --yes to rolling-update");
        return Ok(());
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = rollout.run(groups).await;
    println!();
    for outcome in &report.outcomes {
        let line = format!(
            "{:<24} {:<10} replaced {}",
            outcome.group, outcome.phase, outcome.replaced
        );
        match &outcome.error {
            Some(err) => println!("{line}: {err}"),
            None => println!("{line}"),
        }
    }
    report.into_result()?;
    Ok(())
}

pub(super) fn select_groups(
    declared: &[InstanceGroupSpec],
    wanted: &[String],
) -> anyhow::Result<Vec<InstanceGroupSpec>> {
    if wanted.is_empty() {
        return Ok(declared.to_vec());
    }
    let mut selected = Vec::with_capacity(wanted.len());
    for name in wanted {
        match declared.iter().find(|g| &g.name == name) {
            Some(group) => selected.push(group.clone()),
            None => bail!("instance group {name:?} is not declared"),
        }
    }
    Ok(selected)
}

fn print_groups(groups: &DiscoveredGroups, cloud_only: bool) {
    let mut header = vec!["NAME", "STATUS", "NEEDUPDATE", "READY", "MIN", "MAX"];
    if !cloud_only {
        header.push("NODES");
    }
    let fmt_size = |v: Option<i64>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());

    let rows: Vec<Vec<String>> = groups
        .values()
        .map(|g| {
            let mut row = vec![
                g.name().to_string(),
                g.status().to_string(),
                g.need_update.len().to_string(),
                g.ready.len().to_string(),
                fmt_size(g.min_size),
                fmt_size(g.max_size),
            ];
            if !cloud_only {
                row.push(g.node_count().to_string());
            }
            row
        })
        .collect();

    let widths: Vec<usize> = header
        .iter()
        .enumerate()
        .map(|(i, h)| {
            rows.iter()
                .map(|r| r[i].len())
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    println!("{}", line(header.clone()));
    for row in &rows {
        println!("{}", line(row.iter().map(String::as_str).collect()));
    }
}
