use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt;

use keyrotor::state::{Provider, SettingsUpdate};
use keyrotor::{ConfigStore, ControlApi, Controller, HealthMonitor};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the persisted controller state.
    #[arg(long, env = "KEYROTOR_CONFIG", default_value = "keyrotor.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background health monitor until interrupted.
    Run,
    /// Print controller status.
    Status {
        #[arg(long)]
        full: bool,
    },
    /// Register a new OpenRouter API key.
    AddKey { key: String },
    /// Remove an API key.
    RemoveKey { key: String },
    /// Make an API key the active one.
    ActivateKey { key: String },
    /// Rotate to the next candidate key.
    Rotate,
    /// Probe the active key and record the outcome.
    TestKey,
    /// Switch the current provider (openrouter, ollama, phind).
    SwitchProvider { provider: Provider },
    /// Select a model for the current provider.
    UpdateModel { model: String },
    /// Update controller settings.
    UpdateSettings(SettingsArgs),
}

#[derive(Args)]
struct SettingsArgs {
    #[arg(long)]
    auto_rotate: Option<bool>,
    #[arg(long)]
    check_interval_secs: Option<u64>,
    #[arg(long)]
    max_error_count: Option<u32>,
}

fn init_tracing() {
    fmt()
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let store = ConfigStore::new(&cli.config);
    let controller = Arc::new(Controller::open(store).context("failed to load controller state")?);
    let api = ControlApi::new(Arc::clone(&controller));

    let response = match cli.command {
        Commands::Run => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let monitor = HealthMonitor::new(Arc::clone(&controller), shutdown_rx);
            let handle = tokio::spawn(monitor.run());

            info!(config = %cli.config.display(), "controller running, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;

            shutdown_tx.send(true).ok();
            handle.await.context("monitor task panicked")?;
            return Ok(());
        }
        Commands::Status { full } => api.status(full),
        Commands::AddKey { key } => api.add_key(&key),
        Commands::RemoveKey { key } => api.remove_key(&key),
        Commands::ActivateKey { key } => api.activate_key(&key),
        Commands::Rotate => api.rotate(),
        Commands::TestKey => api.test_current_key().await,
        Commands::SwitchProvider { provider } => api.switch_provider(provider).await,
        Commands::UpdateModel { model } => api.update_model(&model),
        Commands::UpdateSettings(args) => api.update_settings(SettingsUpdate {
            auto_rotate: args.auto_rotate,
            check_interval_secs: args.check_interval_secs,
            max_error_count: args.max_error_count,
        }),
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}
