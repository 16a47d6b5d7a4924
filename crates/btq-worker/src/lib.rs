//! Backtest worker: claims queued runs from Postgres, replays them through
//! the simulation engine, and persists equity/fills/metrics.

pub mod config;
pub mod runner;

pub use config::WorkerConfig;
pub use runner::{run_once, RunFailure, RunOutcome};
