//! Deterministic daily-bar backtest core.
//!
//! Pure logic, no IO: bar/order/fill/lot types, the per-day simulation
//! state machine, FIFO realized-PnL accounting, and equity-curve metrics.
//! Money is integer paise throughout; floats appear only in derived
//! ratios after the replay.

pub mod accounting;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::{ConfigError, RunConfig};
pub use engine::SimEngine;
pub use error::EngineError;
pub use metrics::{
    annual_return_pct, compute_run_metrics, daily_returns, max_drawdown, sharpe_from_equity,
    sharpe_from_returns, volatility_from_returns,
};
pub use types::{
    Bar, EquityPoint, Fill, Lot, Order, Position, RejectReason, RejectedOrder, RunMetrics, Side,
};
