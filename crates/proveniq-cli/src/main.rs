#![forbid(unsafe_code)]

//! **proveniq-cli** – Chain verification CLI for the Proveniq ledger.
//!
//! Walks the hash chain offline, recomputing every hash and link, and
//! reports through its exit code so the tool composes into cron jobs and
//! CI gates:
//!
//! - `0` – chain valid
//! - `1` – chain invalid (tampering or corruption found)
//! - `2` – operational error (database unreachable, bad arguments)

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proveniq_ledger::{record_checkpoint_if_head, verify_range, IntegrityReport};
use proveniq_store_core::LedgerStore;
use proveniq_store_sqlite::SqliteStore;

//─────────────────────────────
//  CLI structure
//─────────────────────────────

#[derive(Parser)]
#[command(name = "proveniq")]
#[command(about = "Proveniq ledger - offline chain verification")]
#[command(version)]
struct Cli {
    /// Database URL (else PROVENIQ_DATABASE_URL)
    #[arg(long, env = "PROVENIQ_DATABASE_URL")]
    database_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute hashes and chain links over a window of the ledger
    Verify {
        /// First sequence number to check
        #[arg(long, default_value = "1")]
        from: u64,
        /// Last sequence number to check (default: chain head)
        #[arg(long)]
        to: Option<u64>,
        /// Maximum entries to examine
        #[arg(long, default_value = "100000")]
        limit: u32,
    },
    /// Verify up to the head and record an integrity checkpoint
    Checkpoint,
    /// Print aggregate chain counters
    Stats,
}

//─────────────────────────────
//  Main application
//─────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("operational error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let store = SqliteStore::open(&cli.database_url)
        .await
        .context("failed to open ledger database")?;

    let code = match cli.command {
        Commands::Verify { from, to, limit } => {
            let report = verify_range(&store, from, to, limit.clamp(1, 100_000)).await?;
            print_report(&report)?;
            exit_for(&report)
        }
        Commands::Checkpoint => {
            let report = verify_range(&store, 1, None, u32::MAX).await?;
            print_report(&report)?;
            if let Some(checkpoint) = record_checkpoint_if_head(&store, &report).await? {
                println!(
                    "checkpoint recorded at sequence {} ({})",
                    checkpoint.checkpoint_sequence, checkpoint.checkpoint_hash
                );
            }
            exit_for(&report)
        }
        Commands::Stats => {
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            ExitCode::SUCCESS
        }
    };

    store.close().await;
    Ok(code)
}

fn print_report(report: &IntegrityReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn exit_for(report: &IntegrityReport) -> ExitCode {
    if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
