//! Atelier command-line host
//!
//! Brings up the worker fleet and one agent session for a project, forwards
//! stdin lines as user messages and prints runner notifications as JSON
//! lines on stdout.

use anyhow::{bail, Context, Result};
use atelier_core::{AgentRuntime, RuntimeConfig};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "atelier", about = "Agent session runtime", version, long_about = None)]
struct Cli {
    /// Path to the runtime configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the fleet and an agent session, then chat over stdin
    Run {
        /// Project directory the agent works in
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,

        /// Project id; defaults to the directory name
        #[arg(long)]
        project_id: Option<String>,

        /// Provider name; defaults to the configured default provider
        #[arg(long)]
        provider: Option<String>,

        /// Skip starting the auxiliary workers
        #[arg(long)]
        no_fleet: bool,
    },
    /// Print the tool catalog built from the configured adapter
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!("Atelier v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref())?;
    let runtime = Arc::new(AgentRuntime::from_config(config).context("invalid runtime config")?);

    match cli.command {
        Command::Run {
            project_dir,
            project_id,
            provider,
            no_fleet,
        } => run(runtime, &project_dir, project_id, provider, no_fleet).await,
        Command::Tools => print_tools(&runtime),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<RuntimeConfig> {
    match RuntimeConfig::resolve_path(explicit) {
        Some(path) => RuntimeConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            warn!("No config directory available, using defaults");
            Ok(RuntimeConfig::default())
        }
    }
}

fn print_tools(runtime: &AgentRuntime) -> Result<()> {
    let Some(catalog) = runtime.tool_catalog()? else {
        bail!("no adapterSource configured");
    };
    println!("{}", serde_json::to_string_pretty(catalog.as_ref())?);
    Ok(())
}

async fn run(
    runtime: Arc<AgentRuntime>,
    project_dir: &Path,
    project_id: Option<String>,
    provider: Option<String>,
    no_fleet: bool,
) -> Result<()> {
    let project_dir = project_dir
        .canonicalize()
        .with_context(|| format!("invalid project directory {}", project_dir.display()))?;
    let project_id = match project_id {
        Some(id) => id,
        None => project_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context("cannot derive a project id, pass --project-id")?,
    };

    if !no_fleet {
        if let Err(e) = runtime.start_fleet(&project_id).await {
            runtime.shutdown().await;
            return Err(e).context("failed to start workers");
        }
    }

    let mut notifications = runtime.subscribe(&project_id);
    let status = match runtime
        .start_session(&project_id, &project_dir, provider.as_deref(), serde_json::Value::Null)
        .await
    {
        Ok(status) => status,
        Err(e) => {
            runtime.shutdown().await;
            return Err(e).context("failed to start agent session");
        }
    };
    info!(
        "Session {:?} running for {} (pid {:?})",
        status.session_id, project_id, status.pid
    );

    let printer = tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => match serde_json::to_string(&notification) {
                    Ok(line) => println!("{}", line),
                    Err(e) => error!("Failed to encode notification: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} notifications", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(text) = line.context("failed to read stdin")? else {
                    info!("Input closed");
                    break;
                };
                if text.trim().is_empty() {
                    continue;
                }
                let correlation_id = uuid::Uuid::new_v4().to_string();
                if let Err(e) = runtime.send(&project_id, &text, &correlation_id, None).await {
                    error!("Failed to send message: {}", e);
                    if !runtime.session_status(&project_id).running {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let report = runtime.shutdown().await;
    printer.abort();

    for (name, reason) in &report.failures {
        error!("Failed to stop {}: {}", name, reason);
    }
    Ok(())
}
