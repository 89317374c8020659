//! cmuxd — workspace provisioning and container lifecycle daemon.
//!
//! Process wiring only: load config, construct the engine, run
//! the reconciler loop, expose CLI entry points for the operations the
//! engine supports. The control-plane document store is an external
//! collaborator `cmuxd` doesn't implement; each invocation below
//! runs against a fresh in-memory stand-in, so `provision`/`stop`/
//! `complete` are meant to be exercised within one process lifetime (e.g.
//! scripted locally) rather than across separate CLI calls.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cmux_core::TaskRunId;
use cmuxd::config::resolve_home_dir;
use cmuxd::{run_doctor, wait_for_shutdown_signal, CmuxdConfig, Engine};

#[derive(Parser)]
#[command(name = "cmuxd")]
#[command(about = "Workspace provisioning and container lifecycle daemon")]
#[command(version)]
struct Cli {
    /// Path to cmuxd's process-level config (binaries, worker image, poll cadence).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciler loop until SIGINT/SIGTERM, draining in-flight
    /// sweeps before exit.
    Daemon,
    /// Seed a Task + TaskRun and provision its workspace and container.
    Provision {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        branch: Option<String>,
    },
    /// Stop a run's container and mark it stopped.
    Stop {
        run_id: String,
    },
    /// Capture diffs for a run and, optionally, open a draft PR.
    Complete {
        run_id: String,
        #[arg(long)]
        open_pr: bool,
    },
    /// Check that docker/git/gh are reachable on PATH.
    Doctor {
        #[arg(long)]
        json: bool,
    },
    /// Write a default cmuxd config file.
    ConfigInit {
        #[arg(long, default_value = "cmuxd.toml")]
        path: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn load_config(path: &Option<PathBuf>) -> anyhow::Result<CmuxdConfig> {
    match path {
        Some(path) => Ok(CmuxdConfig::load(path)?),
        None => Ok(CmuxdConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Daemon => run_daemon(config).await,
        Commands::Provision {
            repo,
            agent,
            description,
            branch,
        } => run_provision(config, repo, agent, description, branch).await,
        Commands::Stop { run_id } => run_stop(config, run_id).await,
        Commands::Complete { run_id, open_pr } => run_complete(config, run_id, open_pr).await,
        Commands::Doctor { json } => {
            run_doctor_command(&config, json);
            Ok(())
        }
        Commands::ConfigInit { path } => run_config_init(path),
    }
}

async fn run_daemon(config: CmuxdConfig) -> anyhow::Result<()> {
    let (engine, mut events) = Engine::new(config, resolve_home_dir());
    let reconciler = engine.reconciler.clone();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(event = ?event.event, at = %event.at, "engine event");
        }
    });

    let loop_handle = tokio::spawn(Arc::clone(&reconciler).run_forever());

    tracing::info!("cmuxd daemon started");
    wait_for_shutdown_signal().await;
    tracing::info!("shutdown requested, letting the in-flight reconciler pass finish");
    reconciler.request_shutdown();
    let _ = loop_handle.await;
    tracing::info!("cmuxd daemon stopped");
    Ok(())
}

async fn run_provision(
    config: CmuxdConfig,
    repo: String,
    agent: String,
    description: Option<String>,
    branch: Option<String>,
) -> anyhow::Result<()> {
    let (engine, _events) = Engine::new(config, resolve_home_dir());
    let task_id = engine.seed_task(&repo, description.clone().unwrap_or_default());
    let info = engine
        .provision_task_run(task_id, agent, repo, branch, description)
        .await
        .map_err(|err| anyhow::anyhow!("{err}"))?;
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "task_run_id": info.task_run_id,
        "base_url": info.base_url,
        "workspace_url": info.workspace_url,
    }))?);
    Ok(())
}

async fn run_stop(config: CmuxdConfig, run_id: String) -> anyhow::Result<()> {
    let (engine, _events) = Engine::new(config, resolve_home_dir());
    engine
        .stop_task_run(&TaskRunId::new(run_id))
        .await
        .map_err(|err| anyhow::anyhow!("{err}"))?;
    println!("stopped");
    Ok(())
}

async fn run_complete(config: CmuxdConfig, run_id: String, open_pr: bool) -> anyhow::Result<()> {
    let (engine, _events) = Engine::new(config, resolve_home_dir());
    let url = engine
        .complete_task_run(&TaskRunId::new(run_id), open_pr)
        .await
        .map_err(|err| anyhow::anyhow!("{err}"))?;
    match url {
        Some(url) => println!("pull request: {url}"),
        None => println!("diffs captured"),
    }
    Ok(())
}

fn run_doctor_command(config: &CmuxdConfig, json: bool) {
    let report = run_doctor(config);
    if json {
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string()));
        return;
    }
    for check in &report.checks {
        let symbol = if check.ok { "\u{2713}" } else { "\u{2717}" };
        println!("{symbol} {}: {}", check.name, check.detail);
    }
    println!(
        "\n{}",
        if report.all_ok { "ready" } else { "one or more required checks failed" }
    );
}

fn run_config_init(path: PathBuf) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    let body = toml::to_string_pretty(&CmuxdConfig::default())?;
    std::fs::write(&path, body)?;
    println!("wrote {}", path.display());
    Ok(())
}
