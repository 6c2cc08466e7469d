//! apiwatchd: the apiwatch daemon.
//!
//! Loads the configuration once, wires the probe engine, and runs one
//! monitor loop per endpoint until Ctrl-C. The other subcommands run a
//! single check or read the recorded event log.
//!
//! # Usage
//!
//! ```text
//! apiwatchd run --config apiwatch.toml
//! apiwatchd check --config apiwatch.toml --endpoint orders
//! apiwatchd status --store apiwatch.redb
//! apiwatchd trend --store apiwatch.redb --endpoint orders --hours 6
//! ```

mod engine;
mod report;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use apiwatch_config::MonitorConfig;
use apiwatch_probe::{CheckResult, Monitor, Probe, epoch_ms};

use crate::engine::{Engine, open_store};

#[derive(Parser)]
#[command(name = "apiwatchd", about = "HTTP API monitoring daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor every configured endpoint until interrupted.
    Run {
        #[arg(long, default_value = "apiwatch.toml")]
        config: PathBuf,
    },

    /// Probe one endpoint once and print the result.
    Check {
        #[arg(long, default_value = "apiwatch.toml")]
        config: PathBuf,

        /// Endpoint name (case-insensitive).
        #[arg(long)]
        endpoint: String,
    },

    /// Show the latest recorded result of every endpoint.
    Status {
        #[arg(long, default_value = "apiwatch.redb")]
        store: PathBuf,
    },

    /// Show an endpoint's recent latency and success history.
    Trend {
        #[arg(long, default_value = "apiwatch.redb")]
        store: PathBuf,

        #[arg(long)]
        endpoint: String,

        /// Defaults to the environment of the endpoint's latest event.
        #[arg(long)]
        environment: Option<String>,

        /// Lookback window in hours.
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,apiwatch=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<MonitorConfig> {
    MonitorConfig::from_file(path)
        .with_context(|| format!("failed to load config {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::Check { config, endpoint } => check(&config, &endpoint).await,
        Command::Status { store } => status(&store),
        Command::Trend {
            store,
            endpoint,
            environment,
            hours,
        } => trend(&store, &endpoint, environment.as_deref(), hours),
    }
}

async fn run(config_path: &Path) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    info!(path = %config_path.display(), endpoints = config.endpoints.len(), "apiwatch starting");

    let engine = Engine::build(config).await?;
    let store = open_store(Path::new(&engine.config.store.path))?;
    let monitor = Monitor::new(engine.checker.clone(), engine.sink(store)?, engine.notifier()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    monitor.run(engine.config.endpoints.clone(), shutdown_rx).await;

    info!("apiwatch stopped");
    Ok(ExitCode::SUCCESS)
}

async fn check(config_path: &Path, name: &str) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    let endpoint = config
        .endpoint(name)
        .cloned()
        .with_context(|| format!("no endpoint named '{name}'"))?;

    let engine = Engine::build(config).await?;
    let result = engine
        .checker
        .check(&endpoint)
        .await
        .unwrap_or_else(|e| CheckResult::exception(&endpoint.name, e.to_string()));

    println!("{}", report::result_line(&result));
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn status(store_path: &Path) -> anyhow::Result<ExitCode> {
    let store = open_store(store_path)?;
    print!("{}", report::latest_table(&store.latest()?));
    Ok(ExitCode::SUCCESS)
}

fn trend(
    store_path: &Path,
    endpoint: &str,
    environment: Option<&str>,
    hours: u64,
) -> anyhow::Result<ExitCode> {
    let store = open_store(store_path)?;
    let environment = match environment {
        Some(env) => env.to_string(),
        None => store
            .latest()?
            .into_iter()
            .find(|e| e.endpoint_name == endpoint)
            .map(|e| e.environment)
            .with_context(|| format!("no events recorded for '{endpoint}'"))?,
    };

    let since_ms = epoch_ms().saturating_sub(hours.saturating_mul(3_600_000));
    let points = store.trend(endpoint, &environment, since_ms)?;
    println!("{endpoint} [{environment}] last {hours}h");
    print!("{}", report::trend_table(&points));
    Ok(ExitCode::SUCCESS)
}
