//! Fill pricing and FIFO lot accounting.
//!
//! All money math is exact integer arithmetic on paise: multiplication goes
//! through `i128` and comes back to `i64` with clamping. Rounding modes are
//! part of the contract — slippage rounds half-away-from-zero, fees round
//! up (ceiling, never negative).

use crate::types::{Lot, Position, Side};

pub(crate) fn mul_qty_price(qty: i64, price_paise: i64) -> i128 {
    (qty as i128) * (price_paise as i128)
}

pub(crate) fn clamp_i64(x: i128) -> i64 {
    if x > i64::MAX as i128 {
        i64::MAX
    } else if x < i64::MIN as i128 {
        i64::MIN
    } else {
        x as i64
    }
}

/// Divide rounding half-away-from-zero. `denom` must be positive.
fn div_round_half_away(numer: i128, denom: i128) -> i128 {
    debug_assert!(denom > 0);
    if numer >= 0 {
        (numer + denom / 2) / denom
    } else {
        (numer - denom / 2) / denom
    }
}

/// Divide rounding toward positive infinity. `denom` must be positive.
fn div_ceil(numer: i128, denom: i128) -> i128 {
    debug_assert!(denom > 0);
    if numer >= 0 {
        (numer + denom - 1) / denom
    } else {
        numer / denom
    }
}

/// Slippage-adjusted fill price for a market order matched at `open_paise`.
///
/// BUY fills above the open, SELL below:
/// `open * (10_000 + sign * slippage_bps) / 10_000`, rounded
/// half-away-from-zero to integer paise.
pub fn slipped_fill_price(open_paise: i64, side: Side, slippage_bps: i64) -> i64 {
    debug_assert!(open_paise >= 0);
    debug_assert!(slippage_bps >= 0);

    let sign: i128 = match side {
        Side::Buy => 1,
        Side::Sell => -1,
    };
    let numer = (open_paise as i128) * (10_000 + sign * slippage_bps as i128);
    clamp_i64(div_round_half_away(numer, 10_000))
}

/// Fee on a fill's notional: `ceil(notional * fee_bps / 10_000)`, never
/// negative.
pub fn fee_for_notional(notional_paise: i128, fee_bps: i64) -> i64 {
    debug_assert!(fee_bps >= 0);
    if notional_paise <= 0 || fee_bps == 0 {
        return 0;
    }
    clamp_i64(div_ceil(notional_paise * fee_bps as i128, 10_000))
}

/// Consume `qty` from the position's lots front-to-back at `sell_px`,
/// returning the realized PnL `sum((sell_px - lot_cost) * taken)`.
///
/// The caller must have verified `qty <= position.qty()`.
pub fn sell_fifo(pos: &mut Position, mut qty: i64, sell_px: i64) -> i64 {
    debug_assert!(qty > 0);
    debug_assert!(qty <= pos.qty());

    let mut realized: i128 = 0;
    while qty > 0 {
        let lot = &mut pos.lots[0];
        let take = lot.qty_remaining.min(qty);

        realized += (sell_px as i128 - lot.cost_price_paise as i128) * (take as i128);

        lot.qty_remaining -= take;
        qty -= take;
        if lot.qty_remaining == 0 {
            pos.lots.remove(0);
        }
    }
    clamp_i64(realized)
}

/// Append a new acquisition lot at the back of the FIFO queue.
pub fn buy_lot(pos: &mut Position, qty: i64, buy_px: i64) {
    debug_assert!(qty > 0);
    pos.lots.push(Lot::new(qty, buy_px));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_slippage_rounds_half_away_from_zero() {
        // 101_000 * 1.0002 = 101_020.2 -> 101_020
        assert_eq!(slipped_fill_price(101_000, Side::Buy, 2), 101_020);
        // 102_500 * 1.0002 = 102_520.5 -> 102_521 (half rounds away)
        assert_eq!(slipped_fill_price(102_500, Side::Buy, 2), 102_521);
        // zero slippage is the raw open
        assert_eq!(slipped_fill_price(101_000, Side::Buy, 0), 101_000);
    }

    #[test]
    fn sell_slippage_subtracts() {
        // 101_000 * 0.9998 = 100_979.8 -> 100_980
        assert_eq!(slipped_fill_price(101_000, Side::Sell, 2), 100_980);
        // 102_500 * 0.9998 = 102_479.5 -> 102_480 (positive half away from zero)
        assert_eq!(slipped_fill_price(102_500, Side::Sell, 2), 102_480);
    }

    #[test]
    fn fee_is_ceiling_and_non_negative() {
        // 1_010_200 * 1 / 10_000 = 101.02 -> 102
        assert_eq!(fee_for_notional(1_010_200, 1), 102);
        // exact multiple does not round up further
        assert_eq!(fee_for_notional(1_000_000, 1), 100);
        assert_eq!(fee_for_notional(0, 5), 0);
        assert_eq!(fee_for_notional(999, 0), 0);
        // tiny notional still pays at least one paisa
        assert_eq!(fee_for_notional(1, 1), 1);
    }

    #[test]
    fn sell_fifo_consumes_oldest_lot_first() {
        let mut pos = Position::new("RELIANCE");
        buy_lot(&mut pos, 10, 100);
        buy_lot(&mut pos, 10, 110);

        // 15 sold at 120: 10 from the 100-lot, 5 from the 110-lot
        let pnl = sell_fifo(&mut pos, 15, 120);
        assert_eq!(pnl, 10 * 20 + 5 * 10);
        assert_eq!(pos.qty(), 5);
        assert_eq!(pos.lots[0].cost_price_paise, 110);
        assert_eq!(pos.lots[0].qty_remaining, 5);
    }

    #[test]
    fn sell_fifo_realizes_losses() {
        let mut pos = Position::new("RELIANCE");
        buy_lot(&mut pos, 10, 200);
        let pnl = sell_fifo(&mut pos, 10, 150);
        assert_eq!(pnl, -500);
        assert!(pos.is_flat());
        assert!(pos.lots.is_empty());
    }
}
