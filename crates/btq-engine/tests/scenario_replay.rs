//! Scenario: single-symbol replays with the standard cost model.
//!
//! Fixed inputs throughout: RELIANCE, NEXT_OPEN fills, starting cash
//! 10,000,000 paise, fee 1 bps, slippage 2 bps. Expected values are
//! hand-computed from the rounding rules (slippage half-away-from-zero,
//! fee ceiling).

use btq_engine::{Bar, EngineError, RejectReason, Side, SimEngine};
use chrono::NaiveDate;

const STARTING_CASH: i64 = 10_000_000;
const FEE_BPS: i64 = 1;
const SLIPPAGE_BPS: i64 = 2;

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, day).unwrap()
}

fn reliance_bar(day: u32, open: i64, close: i64) -> Bar {
    Bar::new(
        d(day),
        "RELIANCE",
        open,
        open.max(close),
        open.min(close),
        close,
        10_000,
    )
}

fn engine() -> SimEngine {
    SimEngine::new(STARTING_CASH, FEE_BPS, SLIPPAGE_BPS).unwrap()
}

/// Replay one day: bars in, fills for the day, then the supplied strategy
/// step, then end-of-day marking.
fn replay_day(
    eng: &mut SimEngine,
    bars: Vec<Bar>,
    strategy: impl FnOnce(&mut SimEngine) -> Result<(), EngineError>,
) {
    let date = bars[0].date;
    for bar in bars {
        eng.on_bar(bar).unwrap();
    }
    eng.process_fills_for_date(date);
    strategy(eng).unwrap();
    eng.end_of_day(date).unwrap();
}

// ---------------------------------------------------------------------------
// No trades: flat curve, zero metrics
// ---------------------------------------------------------------------------

#[test]
fn no_op_strategy_leaves_a_flat_curve() {
    let mut eng = engine();

    for day in 5..=8 {
        replay_day(&mut eng, vec![reliance_bar(day, 100_000, 100_000)], |_| Ok(()));
    }

    let curve = eng.equity_curve();
    assert_eq!(curve.len(), 4);
    assert!(curve.iter().all(|p| p.equity_paise == STARTING_CASH));
    assert!(eng.fills().is_empty());

    let m = eng.metrics();
    assert_eq!(m.sharpe, 0.0);
    assert_eq!(m.max_drawdown_paise, 0);
    assert_eq!(m.max_drawdown_pct, 0.0);
    assert_eq!(m.trades_closed, 0);
    assert_eq!(m.fees_paise, 0);
}

// ---------------------------------------------------------------------------
// Single BUY then hold: exact slippage/fee arithmetic
// ---------------------------------------------------------------------------

#[test]
fn single_buy_fills_next_open_with_exact_costs() {
    let mut eng = engine();

    // day 1: close 100,000; strategy buys 10
    replay_day(&mut eng, vec![reliance_bar(1, 100_000, 100_000)], |eng| {
        eng.place_market_order("RELIANCE", Side::Buy, 10)?;
        Ok(())
    });

    // day 2: open 101,000, close 102,000
    replay_day(&mut eng, vec![reliance_bar(2, 101_000, 102_000)], |_| Ok(()));

    assert_eq!(eng.fills().len(), 1);
    let f = &eng.fills()[0];
    assert_eq!(f.date, d(2));
    // 101,000 * 1.0002 = 101,020.2 -> 101,020
    assert_eq!(f.price_paise, 101_020);
    // ceil(1,010,200 * 1 / 10,000) = 102
    assert_eq!(f.fee_paise, 102);
    assert_eq!(f.order_id, 1);

    assert_eq!(eng.cash(), STARTING_CASH - 1_010_200 - 102);
    assert_eq!(eng.cash(), 8_989_698);

    let day2 = eng.equity_curve().last().unwrap();
    assert_eq!(day2.equity_paise, 8_989_698 + 10 * 102_000);
    assert_eq!(day2.equity_paise, 10_009_698);
}

// ---------------------------------------------------------------------------
// BUY then SELL in the same week: FIFO PnL and win accounting
// ---------------------------------------------------------------------------

#[test]
fn round_trip_realizes_fifo_pnl() {
    let mut eng = engine();

    replay_day(&mut eng, vec![reliance_bar(1, 100_000, 100_000)], |eng| {
        eng.place_market_order("RELIANCE", Side::Buy, 10)?;
        Ok(())
    });
    // buy fills at day 2 open
    replay_day(&mut eng, vec![reliance_bar(2, 101_000, 101_500)], |eng| {
        eng.place_market_order("RELIANCE", Side::Sell, 10)?;
        Ok(())
    });
    // sell fills at day 3 open
    replay_day(&mut eng, vec![reliance_bar(3, 104_000, 104_000)], |_| Ok(()));

    assert_eq!(eng.fills().len(), 2);
    let buy = &eng.fills()[0];
    let sell = &eng.fills()[1];

    assert_eq!(buy.price_paise, 101_020);
    // 104,000 * 0.9998 = 103,979.2 -> 103,979
    assert_eq!(sell.price_paise, 103_979);

    let expected_pnl = (sell.price_paise - buy.price_paise) * 10;
    let m = eng.metrics();
    assert_eq!(m.realized_pnl_paise, expected_pnl);
    assert_eq!(m.trades_closed, 1);
    assert_eq!(m.win_rate, 1.0);
    assert_eq!(m.fees_paise, buy.fee_paise + sell.fee_paise);

    assert_eq!(eng.position("RELIANCE"), 0);
    // flat position: final equity is pure cash
    assert_eq!(
        eng.equity_curve().last().unwrap().equity_paise,
        eng.cash()
    );
}

// ---------------------------------------------------------------------------
// Insufficient funds: rejection, then business as usual
// ---------------------------------------------------------------------------

#[test]
fn unaffordable_buy_is_rejected_and_run_continues() {
    let mut eng = SimEngine::new(1_000, FEE_BPS, SLIPPAGE_BPS).unwrap();

    replay_day(&mut eng, vec![reliance_bar(1, 100_000, 100_000)], |eng| {
        eng.place_market_order("RELIANCE", Side::Buy, 10)?;
        Ok(())
    });
    replay_day(&mut eng, vec![reliance_bar(2, 100_000, 100_000)], |_| Ok(()));

    assert!(eng.fills().is_empty());
    assert_eq!(eng.cash(), 1_000);
    assert_eq!(eng.rejections().len(), 1);
    assert!(matches!(
        eng.rejections()[0].reason,
        RejectReason::InsufficientCash { .. }
    ));
    // equity stays at starting cash on both days
    assert!(eng
        .equity_curve()
        .iter()
        .all(|p| p.equity_paise == 1_000));
}

// ---------------------------------------------------------------------------
// Losing round trip: win rate 0
// ---------------------------------------------------------------------------

#[test]
fn losing_round_trip_counts_no_win() {
    let mut eng = engine();

    replay_day(&mut eng, vec![reliance_bar(1, 100_000, 100_000)], |eng| {
        eng.place_market_order("RELIANCE", Side::Buy, 10)?;
        Ok(())
    });
    replay_day(&mut eng, vec![reliance_bar(2, 101_000, 99_000)], |eng| {
        eng.place_market_order("RELIANCE", Side::Sell, 10)?;
        Ok(())
    });
    replay_day(&mut eng, vec![reliance_bar(3, 95_000, 95_000)], |_| Ok(()));

    let m = eng.metrics();
    assert_eq!(m.trades_closed, 1);
    assert_eq!(m.win_rate, 0.0);
    assert!(m.realized_pnl_paise < 0);
    // drawdown reflects the losing day
    assert!(m.max_drawdown_paise > 0);
    assert!(m.max_drawdown_pct > 0.0);
}

// ---------------------------------------------------------------------------
// Pending order with no remaining trading day is dropped silently
// ---------------------------------------------------------------------------

#[test]
fn order_on_last_day_never_fills() {
    let mut eng = engine();

    replay_day(&mut eng, vec![reliance_bar(1, 100_000, 100_000)], |eng| {
        eng.place_market_order("RELIANCE", Side::Buy, 10)?;
        Ok(())
    });

    // run ends here: order still open, no fill, cash untouched
    assert_eq!(eng.open_order_count(), 1);
    assert!(eng.fills().is_empty());
    assert_eq!(eng.cash(), STARTING_CASH);
}
