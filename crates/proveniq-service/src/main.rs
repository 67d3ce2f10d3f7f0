#![forbid(unsafe_code)]

//! **proveniq-service** – HTTP ingestion and query service for the
//! Proveniq ledger.
//!
//! Hosts the append engine behind the canonical and legacy ingest routes,
//! the query and integrity surface, the proof-view service, and the
//! background webhook delivery worker.
//!
//! ```bash
//! # Start with a local database
//! PROVENIQ_DATABASE_URL=sqlite://data/ledger.db?mode=rwc \
//! PROVENIQ_SCHEMA_VERSION=1.0 \
//! PROVENIQ_ADMIN_API_KEY=change-me-in-production \
//! proveniq-service --port 8080
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proveniq_store_sqlite::SqliteStore;

mod config;
mod error;
mod routes;
mod state;

use config::{LogFormat, ServiceConfig};
use state::AppState;

//─────────────────────────────
//  CLI structure
//─────────────────────────────

#[derive(Parser)]
#[command(name = "proveniq-service")]
#[command(about = "Proveniq ledger - ingestion, verification replay and webhook fan-out")]
#[command(version)]
struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port for the HTTP server
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Database URL override (else PROVENIQ_DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

//─────────────────────────────
//  Main application
//─────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = ServiceConfig::from_env().context("configuration error")?;
    if let Some(database_url) = cli.database_url.clone() {
        config.database_url = database_url;
    }

    init_logging(&cli.log_level, config.log_format);
    info!("starting proveniq-service v{}", env!("CARGO_PKG_VERSION"));

    let store = SqliteStore::open(&config.database_url)
        .await
        .context("failed to open ledger database")?;
    info!("ledger database ready");

    let state = AppState::build(Arc::new(store), config)?;

    // Background delivery worker with a shutdown handle.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(Arc::clone(&state.worker).run(shutdown_rx));

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", cli.host, cli.port))?;
    info!("listening on {}:{}", cli.host, cli.port);

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("http server error: {e}");
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    // Stop the worker and wait for its current pass to finish.
    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;
    info!("proveniq-service stopped");
    Ok(())
}

//─────────────────────────────
//  Utility functions
//─────────────────────────────

fn init_logging(log_level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
