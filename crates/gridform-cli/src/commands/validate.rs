use gridform_core::ClusterValidator;

use super::Context;

pub async fn run(ctx: &Context) -> anyhow::Result<()> {
    let cluster = &ctx.config.cluster.name;
    let report = ctx.cloud.validate(cluster).await?;
    println!("Cluster {cluster} is ready: {}", report.summary());
    Ok(())
}
