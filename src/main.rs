//! Launchpad - build, push and roll out one app of a project environment

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use launchpad::exec::ProcessRunner;
use launchpad::notify::{FeishuNotifier, DEFAULT_WEBHOOK_BASE};
use launchpad::rollout::{timestamp_tag, DeploymentSession, Orchestrator};
use launchpad::DEFAULT_PROJECTS_DIR;

/// Launchpad - manifest synthesis and rollout orchestration
#[derive(Parser, Debug)]
#[command(name = "launchpad", version, about, long_about = None)]
struct Cli {
    /// Directory holding `<project>/<env>/` trees
    #[arg(
        long,
        env = "LAUNCHPAD_PROJECTS_DIR",
        default_value = DEFAULT_PROJECTS_DIR,
        global = true
    )]
    projects_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build, push and apply an app
    Deploy(DeployArgs),

    /// Write an app's manifests without touching the registry or cluster
    Render(RenderArgs),
}

/// Identifies the app to act on
#[derive(Args, Debug)]
struct Target {
    /// Project name
    project: String,
    /// Environment name
    env: String,
    /// App name
    app: String,
}

#[derive(Args, Debug)]
struct DeployArgs {
    #[command(flatten)]
    target: Target,

    /// Directory with the app's source and Dockerfile
    source: PathBuf,

    /// Image tag, defaults to the current time in milliseconds
    #[arg(long)]
    tag: Option<String>,

    /// Chat robot id for progress notifications
    #[arg(long, env = "FEISHU_ROBOT_ID")]
    robot_id: Option<String>,

    /// Chat robot signing secret
    #[arg(long, env = "FEISHU_SECRET", hide_env_values = true)]
    robot_secret: Option<String>,

    /// Webhook base URL
    #[arg(long, env = "LAUNCHPAD_WEBHOOK_BASE", default_value = DEFAULT_WEBHOOK_BASE)]
    webhook_base: String,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    target: Target,

    /// Image tag written into the Deployment
    #[arg(long, default_value = "latest")]
    tag: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy(args) => run_deploy(cli.projects_dir, args).await,
        Commands::Render(args) => run_render(cli.projects_dir, args),
    }
}

async fn run_deploy(projects_dir: PathBuf, args: DeployArgs) -> anyhow::Result<()> {
    let notifier =
        FeishuNotifier::new(args.robot_id, args.robot_secret).with_base_url(args.webhook_base);
    if !notifier.is_configured() {
        tracing::info!("notifications disabled");
    }

    let orchestrator = Orchestrator::new(
        projects_dir,
        Arc::new(ProcessRunner::new()),
        Arc::new(notifier),
    );
    let session = DeploymentSession::new(
        args.target.project,
        args.target.env,
        args.target.app,
        args.source,
    )
    .with_image_tag(args.tag.unwrap_or_else(timestamp_tag));

    let report = orchestrator.deploy(&session).await?;
    println!("Deployed {}", report.image);
    if !report.apply_output.is_empty() {
        println!("{}", report.apply_output);
    }
    Ok(())
}

fn run_render(projects_dir: PathBuf, args: RenderArgs) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(
        projects_dir,
        Arc::new(ProcessRunner::new()),
        Arc::new(launchpad::notify::NoopNotifier),
    );
    let written = orchestrator.render(
        &args.target.project,
        &args.target.env,
        &args.target.app,
        &args.tag,
    )?;
    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}
