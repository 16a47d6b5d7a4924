//! The per-run simulation state machine.
//!
//! One `SimEngine` exclusively owns the cash, positions, order queue, fills
//! and equity curve of a single run. The worker drives it in a strict
//! per-day order:
//!
//! 1. `on_bar` for every bar of the day
//! 2. `process_fills_for_date` — match orders placed on earlier days
//!    against today's opens
//! 3. the strategy's bar hook (which may call `place_market_order`)
//! 4. `end_of_day` — mark positions and record the equity point
//!
//! Orders placed during step 3 on day D therefore fill at day D+1's open.

use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDate;

use crate::accounting::{
    buy_lot, clamp_i64, fee_for_notional, mul_qty_price, sell_fifo, slipped_fill_price,
};
use crate::error::EngineError;
use crate::metrics::compute_run_metrics;
use crate::types::{
    Bar, EquityPoint, Fill, Order, Position, RejectReason, RejectedOrder, RunMetrics, Side,
};

pub struct SimEngine {
    fee_bps: i64,
    slippage_bps: i64,

    cash_paise: i64,
    positions: BTreeMap<String, Position>,
    open_orders: VecDeque<Order>,
    next_order_id: u64,

    fills: Vec<Fill>,
    equity_curve: Vec<EquityPoint>,
    rejections: Vec<RejectedOrder>,

    /// Bars registered for the day currently being replayed.
    today: BTreeMap<String, Bar>,
    today_date: Option<NaiveDate>,
    /// Last seen close per symbol, for marking positions on days where a
    /// symbol has no bar.
    last_closes: BTreeMap<String, i64>,

    fees_paise: i64,
    realized_pnl_paise: i64,
    trades_closed: i64,
    wins: i64,
}

impl SimEngine {
    pub fn new(
        starting_cash_paise: i64,
        fee_bps: i64,
        slippage_bps: i64,
    ) -> Result<Self, EngineError> {
        if starting_cash_paise <= 0 {
            return Err(EngineError::InvalidParams {
                field: "starting_cash_paise",
                value: starting_cash_paise,
            });
        }
        if fee_bps < 0 {
            return Err(EngineError::InvalidParams {
                field: "fee_bps",
                value: fee_bps,
            });
        }
        if slippage_bps < 0 {
            return Err(EngineError::InvalidParams {
                field: "slippage_bps",
                value: slippage_bps,
            });
        }

        Ok(Self {
            fee_bps,
            slippage_bps,
            cash_paise: starting_cash_paise,
            positions: BTreeMap::new(),
            open_orders: VecDeque::new(),
            next_order_id: 1,
            fills: Vec::new(),
            equity_curve: Vec::new(),
            rejections: Vec::new(),
            today: BTreeMap::new(),
            today_date: None,
            last_closes: BTreeMap::new(),
            fees_paise: 0,
            realized_pnl_paise: 0,
            trades_closed: 0,
            wins: 0,
        })
    }

    /// Register a bar for its `(date, symbol)` slot, overwriting any prior
    /// entry for the same symbol. Feeding a bar for a new date starts that
    /// day and clears the previous day's bar map.
    pub fn on_bar(&mut self, bar: Bar) -> Result<(), EngineError> {
        match self.today_date {
            Some(d) if bar.date < d => {
                return Err(EngineError::NonMonotonicDate {
                    prev: d,
                    got: bar.date,
                });
            }
            Some(d) if bar.date > d => {
                self.today.clear();
                self.today_date = Some(bar.date);
            }
            Some(_) => {}
            None => self.today_date = Some(bar.date),
        }

        self.last_closes
            .insert(bar.symbol.clone(), bar.close_paise);
        self.today.insert(bar.symbol.clone(), bar);
        Ok(())
    }

    /// Match every open order placed before `date` against today's bars.
    ///
    /// Orders whose symbol has no bar today are carried forward. Orders the
    /// account cannot honor are dropped and recorded in `rejections`; the
    /// remaining queue is processed regardless.
    pub fn process_fills_for_date(&mut self, date: NaiveDate) {
        let mut still_open: VecDeque<Order> = VecDeque::with_capacity(self.open_orders.len());

        while let Some(order) = self.open_orders.pop_front() {
            if order.placed_on >= date {
                still_open.push_back(order);
                continue;
            }
            let Some(bar) = self.today.get(&order.symbol) else {
                // No bar for this symbol today: keep waiting.
                still_open.push_back(order);
                continue;
            };

            let price = slipped_fill_price(bar.open_paise, order.side, self.slippage_bps);
            let notional = mul_qty_price(order.qty, price);
            let fee = fee_for_notional(notional, self.fee_bps);

            match order.side {
                Side::Buy => {
                    let needed = notional + fee as i128;
                    if (self.cash_paise as i128) < needed {
                        self.rejections.push(RejectedOrder {
                            reason: RejectReason::InsufficientCash {
                                needed_paise: clamp_i64(needed),
                                available_paise: self.cash_paise,
                            },
                            order,
                            date,
                        });
                        continue;
                    }
                    self.cash_paise = clamp_i64(self.cash_paise as i128 - needed);
                    let pos = self
                        .positions
                        .entry(order.symbol.clone())
                        .or_insert_with(|| Position::new(order.symbol.clone()));
                    buy_lot(pos, order.qty, price);
                }
                Side::Sell => {
                    let held = self
                        .positions
                        .get(&order.symbol)
                        .map(|p| p.qty())
                        .unwrap_or(0);
                    if held < order.qty {
                        self.rejections.push(RejectedOrder {
                            reason: RejectReason::InsufficientPosition {
                                requested_qty: order.qty,
                                held_qty: held,
                            },
                            order,
                            date,
                        });
                        continue;
                    }
                    let pos = self
                        .positions
                        .get_mut(&order.symbol)
                        .expect("held > 0 implies position exists");
                    let realized = sell_fifo(pos, order.qty, price);
                    if pos.is_flat() {
                        self.positions.remove(&order.symbol);
                    }

                    self.realized_pnl_paise =
                        clamp_i64(self.realized_pnl_paise as i128 + realized as i128);
                    self.trades_closed += 1;
                    if realized > 0 {
                        self.wins += 1;
                    }
                    self.cash_paise =
                        clamp_i64(self.cash_paise as i128 + notional - fee as i128);
                }
            }

            self.fees_paise = clamp_i64(self.fees_paise as i128 + fee as i128);
            self.fills.push(Fill {
                date,
                symbol: order.symbol,
                side: order.side,
                qty: order.qty,
                price_paise: price,
                fee_paise: fee,
                order_id: order.order_id,
            });
        }

        self.open_orders = still_open;
    }

    /// Enqueue a market order for the next trading day's open and return its
    /// id. Does not touch cash or positions.
    ///
    /// Orders placed before the first bar (during strategy init) are dated
    /// `NaiveDate::MIN` so they fill at the first replayed open.
    pub fn place_market_order(
        &mut self,
        symbol: &str,
        side: Side,
        qty: i64,
    ) -> Result<u64, EngineError> {
        if qty <= 0 {
            return Err(EngineError::InvalidQty { qty });
        }
        let order_id = self.next_order_id;
        self.next_order_id += 1;
        self.open_orders.push_back(Order {
            order_id,
            symbol: symbol.to_string(),
            side,
            qty,
            placed_on: self.today_date.unwrap_or(NaiveDate::MIN),
        });
        Ok(order_id)
    }

    /// Mark every position at today's close (or the last known close for
    /// symbols without a bar today) and record the day's equity point.
    pub fn end_of_day(&mut self, date: NaiveDate) -> Result<i64, EngineError> {
        if let Some(last) = self.equity_curve.last() {
            if date <= last.date {
                return Err(EngineError::NonMonotonicDate {
                    prev: last.date,
                    got: date,
                });
            }
        }

        let mut equity: i128 = self.cash_paise as i128;
        for (symbol, pos) in &self.positions {
            let mark = *self.last_closes.get(symbol).unwrap_or(&0);
            equity += mul_qty_price(pos.qty(), mark);
        }

        let equity = clamp_i64(equity);
        self.equity_curve.push(EquityPoint {
            date,
            equity_paise: equity,
        });
        Ok(equity)
    }

    // --- read surface ---

    pub fn cash(&self) -> i64 {
        self.cash_paise
    }

    /// Signed position quantity for a symbol; 0 when flat or unknown.
    pub fn position(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map(|p| p.qty()).unwrap_or(0)
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn rejections(&self) -> &[RejectedOrder] {
        &self.rejections
    }

    /// Orders still pending. Non-zero at run end means orders that never
    /// found a subsequent trading day; they are simply dropped.
    pub fn open_order_count(&self) -> usize {
        self.open_orders.len()
    }

    pub fn fees_paise(&self) -> i64 {
        self.fees_paise
    }

    pub fn metrics(&self) -> RunMetrics {
        compute_run_metrics(
            &self.equity_curve,
            self.realized_pnl_paise,
            self.fees_paise,
            self.trades_closed,
            self.wins,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, day).unwrap()
    }

    fn bar(day: u32, symbol: &str, open: i64, close: i64) -> Bar {
        Bar::new(d(day), symbol, open, open.max(close), open.min(close), close, 1_000)
    }

    fn engine(cash: i64) -> SimEngine {
        SimEngine::new(cash, 0, 0).unwrap()
    }

    #[test]
    fn rejects_bad_constructor_params() {
        assert!(matches!(
            SimEngine::new(0, 1, 2),
            Err(EngineError::InvalidParams { field: "starting_cash_paise", .. })
        ));
        assert!(matches!(
            SimEngine::new(100, -1, 2),
            Err(EngineError::InvalidParams { field: "fee_bps", .. })
        ));
        assert!(matches!(
            SimEngine::new(100, 1, -2),
            Err(EngineError::InvalidParams { field: "slippage_bps", .. })
        ));
    }

    #[test]
    fn order_ids_are_monotonic_from_one() {
        let mut eng = engine(1_000_000);
        eng.on_bar(bar(5, "A", 100, 100)).unwrap();
        let a = eng.place_market_order("A", Side::Buy, 1).unwrap();
        let b = eng.place_market_order("A", Side::Buy, 1).unwrap();
        let c = eng.place_market_order("A", Side::Sell, 1).unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[test]
    fn zero_or_negative_qty_is_engine_misuse() {
        let mut eng = engine(1_000_000);
        assert_eq!(
            eng.place_market_order("A", Side::Buy, 0),
            Err(EngineError::InvalidQty { qty: 0 })
        );
        assert_eq!(
            eng.place_market_order("A", Side::Buy, -5),
            Err(EngineError::InvalidQty { qty: -5 })
        );
    }

    #[test]
    fn order_placed_today_fills_next_day_not_today() {
        let mut eng = engine(1_000_000);

        eng.on_bar(bar(5, "A", 100, 110)).unwrap();
        eng.process_fills_for_date(d(5));
        eng.place_market_order("A", Side::Buy, 10).unwrap();
        eng.end_of_day(d(5)).unwrap();
        assert!(eng.fills().is_empty());
        assert_eq!(eng.cash(), 1_000_000);

        eng.on_bar(bar(6, "A", 120, 130)).unwrap();
        eng.process_fills_for_date(d(6));
        eng.end_of_day(d(6)).unwrap();

        assert_eq!(eng.fills().len(), 1);
        let f = &eng.fills()[0];
        assert_eq!(f.date, d(6));
        assert_eq!(f.price_paise, 120);
        assert_eq!(eng.cash(), 1_000_000 - 10 * 120);
        assert_eq!(eng.position("A"), 10);
    }

    #[test]
    fn pending_order_waits_for_a_bar_of_its_symbol() {
        let mut eng = engine(1_000_000);

        eng.on_bar(bar(5, "A", 100, 100)).unwrap();
        eng.on_bar(bar(5, "B", 50, 50)).unwrap();
        eng.process_fills_for_date(d(5));
        eng.place_market_order("B", Side::Buy, 2).unwrap();
        eng.end_of_day(d(5)).unwrap();

        // day 6 has a bar for A only: the B order stays pending
        eng.on_bar(bar(6, "A", 100, 100)).unwrap();
        eng.process_fills_for_date(d(6));
        eng.end_of_day(d(6)).unwrap();
        assert!(eng.fills().is_empty());
        assert_eq!(eng.open_order_count(), 1);

        // day 7 brings B back: fill at its open
        eng.on_bar(bar(7, "B", 60, 61)).unwrap();
        eng.process_fills_for_date(d(7));
        eng.end_of_day(d(7)).unwrap();
        assert_eq!(eng.fills().len(), 1);
        assert_eq!(eng.fills()[0].symbol, "B");
        assert_eq!(eng.fills()[0].price_paise, 60);
        assert_eq!(eng.open_order_count(), 0);
    }

    #[test]
    fn rejection_does_not_stop_later_orders() {
        let mut eng = engine(1_500);

        eng.on_bar(bar(5, "A", 100, 100)).unwrap();
        eng.process_fills_for_date(d(5));
        // first order is unaffordable, second is fine
        eng.place_market_order("A", Side::Buy, 100).unwrap();
        eng.place_market_order("A", Side::Buy, 5).unwrap();
        eng.end_of_day(d(5)).unwrap();

        eng.on_bar(bar(6, "A", 100, 100)).unwrap();
        eng.process_fills_for_date(d(6));
        eng.end_of_day(d(6)).unwrap();

        assert_eq!(eng.rejections().len(), 1);
        assert!(matches!(
            eng.rejections()[0].reason,
            RejectReason::InsufficientCash { .. }
        ));
        assert_eq!(eng.fills().len(), 1);
        assert_eq!(eng.fills()[0].qty, 5);
        assert_eq!(eng.cash(), 1_500 - 500);
    }

    #[test]
    fn sell_without_position_is_rejected() {
        let mut eng = engine(1_000_000);

        eng.on_bar(bar(5, "A", 100, 100)).unwrap();
        eng.process_fills_for_date(d(5));
        eng.place_market_order("A", Side::Sell, 3).unwrap();
        eng.end_of_day(d(5)).unwrap();

        eng.on_bar(bar(6, "A", 100, 100)).unwrap();
        eng.process_fills_for_date(d(6));

        assert!(eng.fills().is_empty());
        assert_eq!(eng.rejections().len(), 1);
        assert!(matches!(
            eng.rejections()[0].reason,
            RejectReason::InsufficientPosition { requested_qty: 3, held_qty: 0 }
        ));
        assert_eq!(eng.cash(), 1_000_000);
    }

    #[test]
    fn equity_marks_missing_symbol_at_last_known_close() {
        let mut eng = engine(10_000);

        eng.on_bar(bar(5, "A", 100, 110)).unwrap();
        eng.process_fills_for_date(d(5));
        eng.place_market_order("A", Side::Buy, 10).unwrap();
        eng.end_of_day(d(5)).unwrap();

        eng.on_bar(bar(6, "A", 100, 120)).unwrap();
        eng.process_fills_for_date(d(6));
        eng.end_of_day(d(6)).unwrap();
        assert_eq!(eng.cash(), 10_000 - 1_000);
        assert_eq!(eng.equity_curve().last().unwrap().equity_paise, 9_000 + 10 * 120);

        // day 7 has no bar for A: position marks at 120 still
        eng.on_bar(bar(7, "B", 10, 10)).unwrap();
        eng.process_fills_for_date(d(7));
        eng.end_of_day(d(7)).unwrap();
        assert_eq!(eng.equity_curve().last().unwrap().equity_paise, 9_000 + 10 * 120);
    }

    #[test]
    fn cash_delta_matches_fill_price_and_fee_exactly() {
        let mut eng = SimEngine::new(10_000_000, 1, 2).unwrap();

        eng.on_bar(bar(5, "A", 100_000, 100_000)).unwrap();
        eng.process_fills_for_date(d(5));
        eng.place_market_order("A", Side::Buy, 10).unwrap();
        eng.end_of_day(d(5)).unwrap();

        eng.on_bar(bar(6, "A", 101_000, 101_000)).unwrap();
        let cash_before = eng.cash();
        eng.process_fills_for_date(d(6));
        let f = &eng.fills()[0];
        assert_eq!(
            eng.cash(),
            cash_before - f.price_paise * f.qty - f.fee_paise
        );

        // and the SELL direction
        eng.place_market_order("A", Side::Sell, 10).unwrap();
        eng.end_of_day(d(6)).unwrap();
        eng.on_bar(bar(7, "A", 103_000, 103_000)).unwrap();
        let cash_before = eng.cash();
        eng.process_fills_for_date(d(7));
        let f = &eng.fills()[1];
        assert_eq!(f.side, Side::Sell);
        assert_eq!(
            eng.cash(),
            cash_before + f.price_paise * f.qty - f.fee_paise
        );
    }

    #[test]
    fn duplicate_bar_for_same_day_overwrites() {
        let mut eng = engine(1_000_000);
        eng.on_bar(bar(5, "A", 100, 100)).unwrap();
        eng.on_bar(bar(5, "A", 200, 200)).unwrap();
        eng.place_market_order("A", Side::Buy, 1).unwrap();
        eng.end_of_day(d(5)).unwrap();

        eng.on_bar(bar(6, "A", 300, 300)).unwrap();
        eng.process_fills_for_date(d(6));
        assert_eq!(eng.fills()[0].price_paise, 300);
    }

    #[test]
    fn end_of_day_dates_must_strictly_ascend() {
        let mut eng = engine(1_000);
        eng.on_bar(bar(5, "A", 100, 100)).unwrap();
        eng.end_of_day(d(5)).unwrap();
        assert!(matches!(
            eng.end_of_day(d(5)),
            Err(EngineError::NonMonotonicDate { .. })
        ));
    }

    #[test]
    fn bars_fed_backwards_are_rejected() {
        let mut eng = engine(1_000);
        eng.on_bar(bar(6, "A", 100, 100)).unwrap();
        assert!(matches!(
            eng.on_bar(bar(5, "A", 100, 100)),
            Err(EngineError::NonMonotonicDate { .. })
        ));
    }

    #[test]
    fn equity_identity_holds_after_every_day() {
        let mut eng = SimEngine::new(10_000_000, 1, 2).unwrap();

        for (day, open, close) in [(5, 100_000, 101_000), (6, 101_500, 102_000), (7, 99_000, 98_500)] {
            eng.on_bar(bar(day, "A", open, close)).unwrap();
            eng.process_fills_for_date(d(day));
            if day == 5 {
                eng.place_market_order("A", Side::Buy, 20).unwrap();
            }
            let equity = eng.end_of_day(d(day)).unwrap();
            let expected = eng.cash() + eng.position("A") * close;
            assert_eq!(equity, expected);
            assert_eq!(eng.equity_curve().last().unwrap().equity_paise, expected);
        }
    }
}
