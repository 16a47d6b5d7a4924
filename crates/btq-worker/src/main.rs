//! btq-worker entry point.
//!
//! This file is intentionally thin: it sets up tracing, reads the env
//! config, connects the pool, and drives the poll loop. The per-run
//! pipeline lives in `runner.rs`.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use btq_strategy::StrategyRegistry;
use btq_worker::{config::WorkerConfig, runner};

#[derive(Debug, Parser)]
#[command(name = "btq-worker", about = "Backtest run worker")]
struct Args {
    /// Process at most one run (or one empty poll) and exit.
    #[arg(long)]
    once: bool,

    /// Override POLL_INTERVAL_SECS from the environment.
    #[arg(long)]
    poll_interval_secs: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::dotenv();

    init_tracing();
    let args = Args::parse();

    let mut cfg = WorkerConfig::from_env()?;
    if let Some(poll) = args.poll_interval_secs {
        cfg.poll_interval_secs = poll;
    }

    let pool = btq_db::connect(&cfg.database_url)
        .await
        .context("worker could not connect to the store")?;
    let registry = StrategyRegistry::with_builtins();

    info!(
        worker = %cfg.worker_name,
        poll_secs = cfg.poll_interval_secs,
        strategies = ?registry.names(),
        "worker starting"
    );

    let poll = Duration::from_secs_f64(cfg.poll_interval_secs.max(0.0));
    loop {
        match runner::run_once(&pool, &registry, &cfg.worker_name).await {
            Ok(true) => {
                if args.once {
                    return Ok(());
                }
            }
            Ok(false) => {
                if args.once {
                    return Ok(());
                }
                tokio::time::sleep(poll).await;
            }
            Err(e) => {
                // Store unreachable while polling: log and retry after the
                // poll interval. Nothing to mark FAILED — no run was claimed.
                warn!(error = %e, "store error while polling; backing off");
                if args.once {
                    return Err(e);
                }
                tokio::time::sleep(poll).await;
            }
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
