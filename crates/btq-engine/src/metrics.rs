//! Risk/return metrics derived from the equity curve.
//!
//! Money stays integer everywhere else; this module is the one place floats
//! appear, and only for ratios derived after the replay is done.

use crate::types::{EquityPoint, RunMetrics};

/// Trading days per year used for annualization.
const TRADING_DAYS: f64 = 252.0;

/// Simple daily returns `e_i / e_{i-1} - 1`, skipping steps where the
/// previous equity is zero.
pub fn daily_returns(equity: &[EquityPoint]) -> Vec<f64> {
    let mut returns = Vec::new();
    for w in equity.windows(2) {
        let prev = w[0].equity_paise;
        if prev == 0 {
            continue;
        }
        returns.push(w[1].equity_paise as f64 / prev as f64 - 1.0);
    }
    returns
}

fn mean_and_sample_stdev(returns: &[f64]) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    if returns.len() < 2 {
        return (mean, 0.0);
    }
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// Annualized Sharpe ratio at zero risk-free rate:
/// `mean(r) / stdev_sample(r) * sqrt(252)`. Zero when fewer than two
/// returns exist or the stdev is zero.
pub fn sharpe_from_returns(returns: &[f64]) -> f64 {
    let (mean, stdev) = mean_and_sample_stdev(returns);
    if stdev == 0.0 {
        return 0.0;
    }
    (mean / stdev) * TRADING_DAYS.sqrt()
}

/// Convenience: Sharpe straight from an equity curve.
pub fn sharpe_from_equity(equity: &[EquityPoint]) -> f64 {
    sharpe_from_returns(&daily_returns(equity))
}

/// Annualized volatility: `stdev_sample(r) * sqrt(252)`.
pub fn volatility_from_returns(returns: &[f64]) -> f64 {
    let (_, stdev) = mean_and_sample_stdev(returns);
    stdev * TRADING_DAYS.sqrt()
}

/// Annualized return in percent:
/// `((e_last / e_first)^(252 / n_returns) - 1) * 100`.
/// Zero when there are no returns or the first equity is non-positive.
pub fn annual_return_pct(equity: &[EquityPoint], n_returns: usize) -> f64 {
    if n_returns == 0 {
        return 0.0;
    }
    let first = match equity.first() {
        Some(p) if p.equity_paise > 0 => p.equity_paise as f64,
        _ => return 0.0,
    };
    let last = equity.last().map(|p| p.equity_paise as f64).unwrap_or(first);
    ((last / first).powf(TRADING_DAYS / n_returns as f64) - 1.0) * 100.0
}

/// Largest peak-to-trough decline: `(paise, pct_of_peak)`.
pub fn max_drawdown(equity: &[EquityPoint]) -> (i64, f64) {
    let mut peak: i64 = i64::MIN;
    let mut max_dd: i64 = 0;
    let mut max_dd_pct: f64 = 0.0;

    for p in equity {
        if p.equity_paise > peak {
            peak = p.equity_paise;
        }
        let dd = peak - p.equity_paise;
        if dd > max_dd {
            max_dd = dd;
        }
        if peak > 0 {
            let dd_pct = dd as f64 / peak as f64 * 100.0;
            if dd_pct > max_dd_pct {
                max_dd_pct = dd_pct;
            }
        }
    }
    (max_dd.max(0), max_dd_pct)
}

/// Assemble the full metrics record from the equity curve and the engine's
/// fill accumulators.
pub fn compute_run_metrics(
    equity: &[EquityPoint],
    realized_pnl_paise: i64,
    fees_paise: i64,
    trades_closed: i64,
    wins: i64,
) -> RunMetrics {
    let returns = daily_returns(equity);
    let (max_dd_paise, max_dd_pct) = max_drawdown(equity);

    let win_rate = if trades_closed > 0 {
        wins as f64 / trades_closed as f64
    } else {
        0.0
    };

    RunMetrics {
        sharpe: sharpe_from_returns(&returns),
        max_drawdown_paise: max_dd_paise,
        max_drawdown_pct: max_dd_pct,
        win_rate,
        trades_closed,
        realized_pnl_paise,
        fees_paise,
        annual_return_pct: annual_return_pct(equity, returns.len()),
        volatility: volatility_from_returns(&returns),
    }
}
