//! Per-run execution pipeline.
//!
//! `run_once` claims a run, executes it end to end, and persists the
//! outcome. Every failure inside a run maps to a [`RunFailure`] kind and
//! transitions the run to FAILED; the worker loop itself only sees errors
//! when the store is unreachable.

use anyhow::Result;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use btq_db::ClaimedRun;
use btq_engine::{metrics, RunConfig, SimEngine};
use btq_strategy::{StrategyError, StrategyHost, StrategyRegistry};

/// Why a claimed run ended FAILED. Formats as `Kind: detail` so the runs
/// table's error column stays greppable by kind.
#[derive(Debug)]
pub enum RunFailure {
    ConfigInvalid(String),
    NoBarsFound(String),
    StrategyInvalid(String),
    StrategyRuntime(String),
    EngineUsage(String),
    Persistence(String),
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunFailure::ConfigInvalid(m) => write!(f, "ConfigInvalid: {}", m),
            RunFailure::NoBarsFound(m) => write!(f, "NoBarsFound: {}", m),
            RunFailure::StrategyInvalid(m) => write!(f, "StrategyInvalid: {}", m),
            RunFailure::StrategyRuntime(m) => write!(f, "StrategyRuntime: {}", m),
            RunFailure::EngineUsage(m) => write!(f, "EngineUsage: {}", m),
            RunFailure::Persistence(m) => write!(f, "PersistenceError: {}", m),
        }
    }
}

impl std::error::Error for RunFailure {}

fn strategy_failure(e: StrategyError) -> RunFailure {
    match e {
        StrategyError::Engine(e) => RunFailure::EngineUsage(e.to_string()),
        StrategyError::Failed(m) => RunFailure::StrategyRuntime(m),
    }
}

/// Counts reported after a successful run.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub equity_points: usize,
    pub fills: usize,
    pub rejected_orders: usize,
}

/// Claim and execute at most one run. Returns false when the queue was
/// empty. A `Err` here means the store itself failed; run-level failures
/// are absorbed into the run row.
pub async fn run_once(
    pool: &PgPool,
    registry: &StrategyRegistry,
    worker_name: &str,
) -> Result<bool> {
    let Some(claimed) = btq_db::claim_next_run(pool).await? else {
        return Ok(false);
    };
    let run_id = claimed.run_id;

    info!(%run_id, worker = worker_name, "claimed run");
    log_run(pool, run_id, "INFO", &format!("{worker_name} claimed run {run_id}")).await;

    match execute_run(pool, registry, &claimed).await {
        Ok(outcome) => {
            info!(
                %run_id,
                equity_points = outcome.equity_points,
                fills = outcome.fills,
                rejected = outcome.rejected_orders,
                "run completed"
            );
            log_run(pool, run_id, "INFO", "run completed").await;
        }
        Err(failure) => {
            let message = failure.to_string();
            error!(%run_id, error = %message, "run failed");
            if let Err(e) = btq_db::mark_failed(pool, run_id, &message).await {
                error!(%run_id, error = %e, "failed to record FAILED status");
            }
            log_run(pool, run_id, "ERROR", &format!("run failed: {message}")).await;
        }
    }

    Ok(true)
}

/// The pipeline for one claimed run:
/// config -> instruments -> strategy -> bars -> replay -> metrics -> persist.
async fn execute_run(
    pool: &PgPool,
    registry: &StrategyRegistry,
    claimed: &ClaimedRun,
) -> Result<RunOutcome, RunFailure> {
    let run_id = claimed.run_id;

    let cfg: RunConfig = serde_json::from_value(claimed.config_json.clone())
        .map_err(|e| RunFailure::ConfigInvalid(e.to_string()))?;
    cfg.validate()
        .map_err(|e| RunFailure::ConfigInvalid(e.to_string()))?;

    // Instrument set: explicit symbols or a portfolio reference.
    let tickers: Vec<String> = match cfg.portfolio_id {
        Some(portfolio_id) => {
            let tickers = btq_db::resolve_portfolio_tickers(pool, portfolio_id)
                .await
                .map_err(|e| RunFailure::Persistence(e.to_string()))?;
            if tickers.is_empty() {
                return Err(RunFailure::ConfigInvalid(format!(
                    "portfolio {portfolio_id} has no symbols"
                )));
            }
            tickers
        }
        None => cfg.symbols.clone().unwrap_or_default(),
    };
    log_run(
        pool,
        run_id,
        "INFO",
        &format!(
            "resolved symbols: {tickers:?} (mode={})",
            if cfg.portfolio_id.is_some() {
                "PORTFOLIO"
            } else {
                "SYMBOLS"
            }
        ),
    )
    .await;

    // Strategy: persisted code first, inline config code as fallback.
    let code = match claimed.strategy_id {
        Some(strategy_id) => btq_db::fetch_strategy_code(pool, strategy_id)
            .await
            .map_err(|e| RunFailure::Persistence(e.to_string()))?,
        None => None,
    };
    let code = code
        .or_else(|| cfg.strategy_code.clone())
        .ok_or_else(|| RunFailure::StrategyInvalid("no strategy code for run".to_string()))?;
    let strategy = registry
        .resolve(&code)
        .map_err(|e| RunFailure::StrategyInvalid(e.to_string()))?;

    let bars = btq_db::load_bars_by_date(pool, &tickers, cfg.start_date, cfg.end_date)
        .await
        .map_err(|e| RunFailure::Persistence(e.to_string()))?;
    if bars.is_empty() {
        return Err(RunFailure::NoBarsFound(format!(
            "no bars for symbols {:?} between {} and {}",
            tickers, cfg.start_date, cfg.end_date
        )));
    }
    log_run(
        pool,
        run_id,
        "INFO",
        &format!(
            "starting engine: {} bars over {} trading days",
            bars.bar_count(),
            bars.by_date.len()
        ),
    )
    .await;

    // Replay. Pure and synchronous: all bars are already in memory.
    let mut engine = SimEngine::new(cfg.starting_cash_paise, cfg.fee_bps, cfg.slippage_bps)
        .map_err(|e| RunFailure::EngineUsage(e.to_string()))?;
    let mut host = StrategyHost::new(strategy);
    host.init_once(&mut engine).map_err(strategy_failure)?;

    for (date, day_bars) in &bars.by_date {
        for bar in day_bars {
            engine
                .on_bar(bar.clone())
                .map_err(|e| RunFailure::EngineUsage(e.to_string()))?;
        }
        engine.process_fills_for_date(*date);
        for bar in day_bars {
            host.on_bar(&mut engine, bar).map_err(strategy_failure)?;
        }
        engine
            .end_of_day(*date)
            .map_err(|e| RunFailure::EngineUsage(e.to_string()))?;
    }

    for rejection in engine.rejections() {
        warn!(
            %run_id,
            order_id = rejection.order.order_id,
            symbol = %rejection.order.symbol,
            "order rejected: {}",
            rejection.reason
        );
        log_run(
            pool,
            run_id,
            "WARN",
            &format!(
                "order {} ({} {} x{}) rejected: {}",
                rejection.order.order_id,
                rejection.order.side.as_str(),
                rejection.order.symbol,
                rejection.order.qty,
                rejection.reason
            ),
        )
        .await;
    }
    if engine.open_order_count() > 0 {
        log_run(
            pool,
            run_id,
            "INFO",
            &format!(
                "{} order(s) still pending at run end were dropped",
                engine.open_order_count()
            ),
        )
        .await;
    }

    // Engine-reported metrics, with a recompute fallback when the engine
    // reports exact zeros for the curve-derived values.
    let mut run_metrics = engine.metrics();
    if run_metrics.sharpe == 0.0 {
        run_metrics.sharpe = metrics::sharpe_from_equity(engine.equity_curve());
    }
    if run_metrics.max_drawdown_pct == 0.0 {
        run_metrics.max_drawdown_pct = metrics::max_drawdown(engine.equity_curve()).1;
    }

    let outcome = RunOutcome {
        equity_points: engine.equity_curve().len(),
        fills: engine.fills().len(),
        rejected_orders: engine.rejections().len(),
    };
    log_run(
        pool,
        run_id,
        "INFO",
        &format!(
            "equity points={} fills={}",
            outcome.equity_points, outcome.fills
        ),
    )
    .await;

    btq_db::persist_results(
        pool,
        run_id,
        engine.equity_curve(),
        engine.fills(),
        &run_metrics,
        &bars.symbol_ids,
    )
    .await
    .map_err(|e| RunFailure::Persistence(e.to_string()))?;

    Ok(outcome)
}

/// Best-effort structured run log. A failed log write never fails a run.
async fn log_run(pool: &PgPool, run_id: Uuid, level: &str, message: &str) {
    if let Err(e) = btq_db::append_run_log(pool, run_id, level, message).await {
        warn!(%run_id, error = %e, "run log write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages_are_kind_prefixed() {
        assert_eq!(
            RunFailure::ConfigInvalid("symbols missing".to_string()).to_string(),
            "ConfigInvalid: symbols missing"
        );
        assert_eq!(
            RunFailure::Persistence("tx aborted".to_string()).to_string(),
            "PersistenceError: tx aborted"
        );
        assert_eq!(
            RunFailure::NoBarsFound("empty range".to_string()).to_string(),
            "NoBarsFound: empty range"
        );
    }

    #[test]
    fn strategy_errors_map_to_the_right_kind() {
        let engine_err = btq_engine::EngineError::InvalidQty { qty: 0 };
        assert!(matches!(
            strategy_failure(StrategyError::Engine(engine_err)),
            RunFailure::EngineUsage(_)
        ));
        assert!(matches!(
            strategy_failure(StrategyError::Failed("x".to_string())),
            RunFailure::StrategyRuntime(_)
        ));
    }
}
