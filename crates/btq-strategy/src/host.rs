use btq_engine::{Bar, SimEngine};

use crate::types::{Strategy, StrategyContext, StrategyError};

/// Drives a strategy's lifecycle against an engine: `init` exactly once
/// before the first bar, then `on_bar` per bar in loader order.
pub struct StrategyHost {
    strategy: Box<dyn Strategy>,
    initialized: bool,
}

impl StrategyHost {
    pub fn new(strategy: Box<dyn Strategy>) -> Self {
        Self {
            strategy,
            initialized: false,
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Run `init` if it has not run yet. Idempotent.
    pub fn init_once(&mut self, engine: &mut SimEngine) -> Result<(), StrategyError> {
        if self.initialized {
            return Ok(());
        }
        self.initialized = true;
        let mut ctx = StrategyContext::new(engine);
        self.strategy.init(&mut ctx)
    }

    /// Forward one bar to the strategy. Guarantees `init` ran first.
    pub fn on_bar(&mut self, engine: &mut SimEngine, bar: &Bar) -> Result<(), StrategyError> {
        self.init_once(engine)?;
        let mut ctx = StrategyContext::new(engine);
        self.strategy.on_bar(&mut ctx, bar)
    }
}
