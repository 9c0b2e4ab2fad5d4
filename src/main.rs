//! QRM Ledger - RMS interference scoring service
//!
//! # Usage
//!
//! ```bash
//! # Serve the ledger over HTTP
//! cargo run --release -- --config qrm_config.toml
//!
//! # Score recordings from a file or stdin (one JSON recording per line)
//! ./simulation --count 24 | ./qrm-ledger ingest -
//! ```
//!
//! # Environment Variables
//!
//! - `QRM_CONFIG`: Path to the TOML configuration
//! - `QRM_CORS_ORIGINS`: Comma-separated allowed origins for the HTTP API
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use qrm_ledger::api::{create_app, ApiState};
use qrm_ledger::{QrmConfig, RecordingSource, ScoringEngine};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "qrm-ledger")]
#[command(about = "RMS interference scoring and time-series ledger")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML configuration (overrides QRM_CONFIG)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the server address (default from config: "127.0.0.1:7060")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the data directory holding the logs and counter
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Score newline-delimited JSON recordings and exit
    Ingest {
        /// Input file, or "-" for stdin
        #[arg(default_value = "-")]
        input: String,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

// ============================================================================
// Ingest
// ============================================================================

async fn run_ingest(engine: Arc<ScoringEngine>, input: &str) -> Result<()> {
    let mut source = if input == "-" {
        RecordingSource::stdin()
    } else {
        RecordingSource::open(std::path::Path::new(input))
            .await
            .with_context(|| format!("Failed to open {}", input))?
    };
    info!("Ingesting recordings from {}", source.source_name());

    let mut scored = 0usize;
    let mut rejected = 0usize;
    while let Some(recording) = source
        .next_recording()
        .await
        .context("Failed to read recording input")?
    {
        let engine = Arc::clone(&engine);
        let result = tokio::task::spawn_blocking(move || engine.score_recording(recording))
            .await
            .context("Scoring task panicked")?;
        match result {
            Ok(outcome) => {
                scored += 1;
                println!("{}", serde_json::to_string(&outcome)?);
            }
            Err(e) => {
                rejected += 1;
                warn!("Recording rejected: {}", e);
            }
        }
    }

    info!("Ingest complete: {} scored, {} rejected", scored, rejected);
    Ok(())
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(engine: Arc<ScoringEngine>, config: &QrmConfig, addr: String) -> Result<()> {
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let app = create_app(ApiState::new(engine, &config.station.name));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("HTTP API listening on http://{}/api/v2", addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            info!("[HttpServer] Received shutdown signal");
        })
        .await;

    match result {
        Ok(()) => {
            info!("[HttpServer] Graceful shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("[HttpServer] Server error: {}", e);
            Err(anyhow::anyhow!("HTTP server error: {}", e))
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = QrmConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }

    if let Some(SubCommand::ShowConfig) = &args.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  QRM Ledger - RMS interference scoring");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "Station: {} | Levels: {} .. {} dB | Capture sets: {}",
        if config.station.name.is_empty() { "unset" } else { &config.station.name },
        config.levels.min_db,
        config.levels.max_db,
        config.capture_sets.len()
    );

    let engine = ScoringEngine::open(&config).with_context(|| {
        format!("Failed to open ledger at {}", config.storage.data_dir.display())
    })?;
    info!(
        "Ledger ready: backend={} last_counter={}",
        engine.ledger().backend_name(),
        engine.ledger().last_counter()?
    );
    let engine = Arc::new(engine);

    match args.command {
        Some(SubCommand::Ingest { input }) => run_ingest(engine, &input).await,
        _ => {
            let addr = args.addr.unwrap_or_else(|| config.server.addr.clone());
            run_server(engine, &config, addr).await
        }
    }
}
