//! gridform — converge cluster infrastructure and roll its nodes.
//!
//! # Usage
//!
//! ```text
//! gridform plan --config cluster.toml
//! gridform apply --config cluster.toml --yes
//! gridform rolling-update --config cluster.toml --yes
//! gridform validate --config cluster.toml
//! gridform delete-instance-group nodes --config cluster.toml --yes
//! ```
//!
//! The cloud is a local redb-backed simulation (`--state`), so every command
//! runs without provider credentials.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "gridform",
    about = "gridform — declarative cluster infrastructure and rolling updates",
    version,
    propagate_version = true
)]
struct Cli {
    /// Cluster spec file.
    #[arg(short, long, global = true, default_value = "cluster.toml")]
    config: PathBuf,

    /// Local cloud database.
    #[arg(long, global = true, default_value = "gridform.redb")]
    state: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what apply would change, without changing anything.
    Plan {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Converge the cloud to the cluster spec. Without --yes this is a plan.
    Apply {
        #[arg(long)]
        yes: bool,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Replace instances that run an outdated launch configuration.
    RollingUpdate(RollingUpdateArgs),
    /// Check that every cluster node is ready.
    Validate,
    /// Delete a declared instance group's autoscaling group and launch
    /// configurations. Without --yes only the live group is shown.
    DeleteInstanceGroup {
        name: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(clap::Args)]
pub struct RollingUpdateArgs {
    /// Perform the update. Without it, only the discovery table is printed.
    #[arg(long)]
    yes: bool,

    /// Replace instances even if they are up to date.
    #[arg(long)]
    force: bool,

    /// Do not cordon or validate through the cluster API.
    #[arg(long)]
    cloud_only: bool,

    /// Wait after replacing a control-plane instance (e.g. 5m).
    #[arg(long, value_parser = parse_interval)]
    master_interval: Option<Duration>,

    /// Wait after replacing a worker instance (e.g. 2m).
    #[arg(long, value_parser = parse_interval)]
    node_interval: Option<Duration>,

    /// Wait after replacing a bastion instance (e.g. 5m).
    #[arg(long, value_parser = parse_interval)]
    bastion_interval: Option<Duration>,

    /// Validation attempts after the first, per replaced instance.
    #[arg(long)]
    validation_retries: Option<u32>,

    /// Only roll these instance groups.
    #[arg(long = "instance-group", value_name = "NAME")]
    instance_groups: Vec<String>,
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    gridform_core::config::parse_duration(s)
        .ok_or_else(|| format!("invalid duration {s:?} (expected e.g. 500ms, 30s, 5m, 1h)"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,gridform=debug"))?;
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let ctx = commands::Context::load(&cli.config, &cli.state)?;

    match cli.command {
        Commands::Plan { format } => commands::apply::run(&ctx, false, &format).await,
        Commands::Apply { yes, format } => commands::apply::run(&ctx, yes, &format).await,
        Commands::RollingUpdate(args) => commands::rolling_update::run(&ctx, args).await,
        Commands::Validate => commands::validate::run(&ctx).await,
        Commands::DeleteInstanceGroup { name, yes } => {
            commands::delete_group::run(&ctx, &name, yes).await
        }
    }
}
