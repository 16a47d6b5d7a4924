//! Built-in strategies.
//!
//! Signal math here is exact integer arithmetic (cross-multiplied sums
//! instead of float averages) so replays stay bit-for-bit reproducible.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;

use btq_engine::Bar;

use crate::registry::{RegistryError, StrategyRegistry};
use crate::types::{Strategy, StrategyContext, StrategyError};

pub(crate) fn register_builtins(reg: &mut StrategyRegistry) {
    reg.register("noop", |_params| Ok(Box::new(Noop) as Box<dyn Strategy>))
        .expect("builtin registration");
    reg.register("buy_and_hold", |params| {
        Ok(Box::new(BuyAndHold::from_params(params)?) as Box<dyn Strategy>)
    })
    .expect("builtin registration");
    reg.register("sma_cross", |params| {
        Ok(Box::new(SmaCross::from_params(params)?) as Box<dyn Strategy>)
    })
    .expect("builtin registration");
}

fn parse_params<'de, P: Deserialize<'de> + Default>(
    name: &str,
    params: &'de Value,
) -> Result<P, RegistryError> {
    if params.is_null() {
        return Ok(P::default());
    }
    P::deserialize(params).map_err(|e| RegistryError::InvalidParams {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// noop
// ---------------------------------------------------------------------------

/// Never trades. Useful as a baseline and for queue/pipeline smoke runs.
pub struct Noop;

impl Strategy for Noop {
    fn name(&self) -> &str {
        "noop"
    }

    fn on_bar(&mut self, _ctx: &mut StrategyContext<'_>, _bar: &Bar) -> Result<(), StrategyError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// buy_and_hold
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BuyAndHoldParams {
    qty: i64,
}

impl Default for BuyAndHoldParams {
    fn default() -> Self {
        Self { qty: 1 }
    }
}

/// Buys `qty` of every symbol on its first bar, then holds.
pub struct BuyAndHold {
    qty: i64,
    bought: BTreeSet<String>,
}

impl BuyAndHold {
    fn from_params(params: &Value) -> Result<Self, RegistryError> {
        let p: BuyAndHoldParams = parse_params("buy_and_hold", params)?;
        if p.qty <= 0 {
            return Err(RegistryError::InvalidParams {
                name: "buy_and_hold".to_string(),
                reason: format!("qty must be > 0, got {}", p.qty),
            });
        }
        Ok(Self {
            qty: p.qty,
            bought: BTreeSet::new(),
        })
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext<'_>, bar: &Bar) -> Result<(), StrategyError> {
        if self.bought.insert(bar.symbol.clone()) {
            ctx.buy(&bar.symbol, self.qty)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// sma_cross
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SmaCrossParams {
    fast: usize,
    slow: usize,
    qty: i64,
}

impl Default for SmaCrossParams {
    fn default() -> Self {
        Self {
            fast: 5,
            slow: 20,
            qty: 1,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum SmaSignal {
    FastAbove,
    FastBelowOrEqual,
}

/// Per-symbol SMA crossover: buy `qty` when the fast average crosses above
/// the slow one, sell the held quantity when it crosses back below.
pub struct SmaCross {
    fast: usize,
    slow: usize,
    qty: i64,
    closes: BTreeMap<String, Vec<i64>>,
    last_signal: BTreeMap<String, SmaSignal>,
}

impl SmaCross {
    fn from_params(params: &Value) -> Result<Self, RegistryError> {
        let p: SmaCrossParams = parse_params("sma_cross", params)?;
        if p.fast == 0 || p.slow <= p.fast {
            return Err(RegistryError::InvalidParams {
                name: "sma_cross".to_string(),
                reason: format!("need 0 < fast < slow, got fast={} slow={}", p.fast, p.slow),
            });
        }
        if p.qty <= 0 {
            return Err(RegistryError::InvalidParams {
                name: "sma_cross".to_string(),
                reason: format!("qty must be > 0, got {}", p.qty),
            });
        }
        Ok(Self {
            fast: p.fast,
            slow: p.slow,
            qty: p.qty,
            closes: BTreeMap::new(),
            last_signal: BTreeMap::new(),
        })
    }

    /// FastAbove iff mean(last fast closes) > mean(last slow closes),
    /// compared as `sum_fast * slow > sum_slow * fast` to stay in integers.
    fn signal(&self, closes: &[i64]) -> SmaSignal {
        let fast_sum: i128 = closes[closes.len() - self.fast..]
            .iter()
            .map(|&c| c as i128)
            .sum();
        let slow_sum: i128 = closes[closes.len() - self.slow..]
            .iter()
            .map(|&c| c as i128)
            .sum();
        if fast_sum * self.slow as i128 > slow_sum * self.fast as i128 {
            SmaSignal::FastAbove
        } else {
            SmaSignal::FastBelowOrEqual
        }
    }
}

impl Strategy for SmaCross {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext<'_>, bar: &Bar) -> Result<(), StrategyError> {
        let closes = self.closes.entry(bar.symbol.clone()).or_default();
        closes.push(bar.close_paise);
        if closes.len() > self.slow {
            closes.remove(0);
        }
        if closes.len() < self.slow {
            return Ok(());
        }

        let signal = self.signal(self.closes.get(&bar.symbol).expect("history just written"));
        let prev = self.last_signal.insert(bar.symbol.clone(), signal);

        match (prev, signal) {
            (Some(SmaSignal::FastBelowOrEqual), SmaSignal::FastAbove) => {
                if ctx.position(&bar.symbol) == 0 {
                    ctx.buy(&bar.symbol, self.qty)?;
                }
            }
            (Some(SmaSignal::FastAbove), SmaSignal::FastBelowOrEqual) => {
                let held = ctx.position(&bar.symbol);
                if held > 0 {
                    ctx.sell(&bar.symbol, held)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
