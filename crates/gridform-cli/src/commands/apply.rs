use gridform_engine::{Executor, RetryPolicy};

use super::Context;

/// Plan (`yes == false`) or apply the declared tasks.
pub async fn run(ctx: &Context, yes: bool, format: &str) -> anyhow::Result<()> {
    let tasks = ctx.config.tasks()?;
    let policy = RetryPolicy::from_config(&ctx.config.retry)?;
    let executor = Executor::new(ctx.cloud.clone(), policy);

    let summary = executor.apply(tasks, !yes).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => {
            if summary.is_empty() && summary.warnings.is_empty() {
                println!("No changes. Infrastructure matches the cluster spec.");
            } else {
                println!("{summary}");
            }
            if !yes && !summary.is_empty() {
                println!();
                println!("Must specify --yes to apply changes");
            }
        }
    }
    Ok(())
}
