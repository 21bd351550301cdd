//! lantern daemon binary.
//!
//! Wires the engine over a filesystem workspace and runs it either as a
//! daemon (`lantern run`) or as a local chat REPL (`lantern chat`).
//! Real provider and transport adapters register against the
//! `LlmPort` / `ChannelPort` contracts; without one configured, a stub
//! provider keeps the binary usable for smoke-testing the engine.

mod console;
mod stub;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lantern_channels::ChannelRegistry;
use lantern_core::runtime::{Runtime, RuntimeBuilder};
use lantern_core::storage::NativeStorage;
use lantern_types::config::RuntimeConfig;

#[derive(Parser)]
#[command(name = "lantern", version, about = "Conversational AI agent runtime")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace directory for persistent state.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: scheduler plus registered channels.
    Run,
    /// Chat with the agent on the terminal.
    Chat,
    /// List persisted sessions.
    Sessions,
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

fn workspace_dir(cli_override: Option<&PathBuf>, config: &RuntimeConfig) -> PathBuf {
    if let Some(dir) = cli_override {
        return dir.clone();
    }
    if let Some(dir) = &config.workspace {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lantern")
        .join("workspace")
}

fn build_runtime(cli: &Cli, channels: Arc<ChannelRegistry>) -> Result<Runtime> {
    let config = load_config(cli.config.as_ref())?;
    let workspace = workspace_dir(cli.workspace.as_ref(), &config);
    info!(workspace = %workspace.display(), "starting lantern");

    let storage = Arc::new(NativeStorage::new(workspace));
    let runtime = RuntimeBuilder::new(config, storage, Arc::new(stub::StubPort))
        .channels(channels)
        .build()?;
    Ok(runtime)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Run => {
            let channels = Arc::new(ChannelRegistry::new());
            let runtime = build_runtime(&cli, channels)?;

            let cancel = CancellationToken::new();
            let scheduler = runtime.scheduler.clone();
            let scheduler_cancel = cancel.clone();
            let scheduler_task =
                tokio::spawn(async move { scheduler.run(scheduler_cancel).await });

            tokio::signal::ctrl_c().await?;
            info!("shutdown requested");
            cancel.cancel();
            runtime.shutdown();
            let _ = scheduler_task.await;
            Ok(())
        }
        Command::Chat => {
            let console = Arc::new(console::ConsoleChannel::new());
            let channels = Arc::new(ChannelRegistry::new());
            channels.register(console.clone());
            let runtime = build_runtime(&cli, channels)?;
            console::chat_loop(&runtime).await
        }
        Command::Sessions => {
            let channels = Arc::new(ChannelRegistry::new());
            let runtime = build_runtime(&cli, channels)?;
            for identity in runtime.sessions.list(None).await? {
                println!("{identity}");
            }
            Ok(())
        }
    }
}
