use anyhow::{Context, Result};
use clap::Parser;
use mcphub_core::events::EventLog;
use mcphub_core::storage::JsonlEventLog;
use std::path::PathBuf;
use std::sync::Arc;

mod api;
mod config;
mod websocket;

use config::{AppState, HostConfig};

#[derive(Parser, Debug)]
#[command(name = "mcphub")]
#[command(about = "MCP host - routes JSON-RPC calls between clients and servers", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "MCPHUB_CONFIG", default_value = "mcphub.toml")]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long, env = "MCPHUB_PORT", default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "MCPHUB_HOST", default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcphub=info,tower_http=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();

    tracing::info!("Starting mcphub");

    let config = HostConfig::load(&args.config)?;
    let state = AppState::new(&config);

    let liveness = state
        .host
        .spawn_liveness_monitor(config.liveness_interval(), config.liveness_timeout());

    let event_log = match &config.events.log_dir {
        Some(dir) => {
            tracing::info!("Recording host events under {}", dir.display());
            let log = Arc::new(
                JsonlEventLog::new(dir.clone()).context("Failed to create event log")?,
            );
            let recorder = state.host.spawn_event_recorder(log.clone() as Arc<dyn EventLog>);
            Some((log, recorder))
        }
        None => None,
    };

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("Starting API server on {}", addr);

    api::serve(&addr, state, shutdown_signal()).await?;

    liveness.abort();
    if let Some((log, recorder)) = event_log {
        recorder.abort();
        log.flush().await.context("Failed to flush event log")?;
    }

    tracing::info!("mcphub stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
