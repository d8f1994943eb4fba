//! synth-orchestrator daemon.
//!
//! Loads the TOML configuration, starts the worker pool and serves the HTTP
//! API until SIGINT/SIGTERM, then shuts down in order.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use synth_orchestrator::config::{load_config, OrchestratorConfig};
use synth_orchestrator::engine::ProcessEngineFactory;
use synth_orchestrator::lifecycle::wait_for_signal;
use synth_orchestrator::observability::{logging, metrics};
use synth_orchestrator::{api, Orchestrator};

#[derive(Parser)]
#[command(name = "synth-orchestrator")]
#[command(about = "Fault-tolerant orchestrator for speech-synthesis workers", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => OrchestratorConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "synth-orchestrator starting");
    tracing::info!(
        config = ?args.config,
        min_workers = config.pool.min_workers,
        max_workers = config.pool.max_workers,
        engine = %config.engine.command,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let factory = Arc::new(ProcessEngineFactory::new(config.engine.clone()));
    let orchestrator = Orchestrator::start(config.clone(), factory).await?;

    if config.api.enabled {
        let listener = TcpListener::bind(&config.api.bind_address).await?;
        api::serve(orchestrator.clone(), listener, wait_for_signal()).await?;
    } else {
        wait_for_signal().await;
    }

    orchestrator.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
