use btq_engine::{Bar, EngineError, Side, SimEngine};

/// The capability surface a strategy sees.
///
/// Intentionally narrow: enqueue market orders, read cash, read a signed
/// position. Nothing else of the engine (lots, order queue, fills) is
/// reachable through it.
pub struct StrategyContext<'a> {
    engine: &'a mut SimEngine,
}

impl<'a> StrategyContext<'a> {
    pub(crate) fn new(engine: &'a mut SimEngine) -> Self {
        Self { engine }
    }

    /// Enqueue a BUY for the next trading day's open. Returns the order id.
    pub fn buy(&mut self, symbol: &str, qty: i64) -> Result<u64, EngineError> {
        self.engine.place_market_order(symbol, Side::Buy, qty)
    }

    /// Enqueue a SELL for the next trading day's open. Returns the order id.
    pub fn sell(&mut self, symbol: &str, qty: i64) -> Result<u64, EngineError> {
        self.engine.place_market_order(symbol, Side::Sell, qty)
    }

    /// Current cash balance in paise.
    pub fn cash(&self) -> i64 {
        self.engine.cash()
    }

    /// Signed position quantity for a symbol; 0 when flat.
    pub fn position(&self, symbol: &str) -> i64 {
        self.engine.position(symbol)
    }
}

/// Errors surfaced by strategy hooks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StrategyError {
    /// The strategy misused the engine (bad qty, etc.). Fails the run.
    Engine(EngineError),
    /// The strategy's own logic gave up. Fails the run.
    Failed(String),
}

impl From<EngineError> for StrategyError {
    fn from(e: EngineError) -> Self {
        StrategyError::Engine(e)
    }
}

impl std::fmt::Display for StrategyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyError::Engine(e) => write!(f, "engine: {}", e),
            StrategyError::Failed(msg) => write!(f, "strategy failed: {}", msg),
        }
    }
}

impl std::error::Error for StrategyError {}

/// A backtest strategy. `init` runs exactly once before the first bar;
/// `on_bar` runs once per bar in the loader's order (dates ascending,
/// tickers ascending within a date).
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn init(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext<'_>, bar: &Bar) -> Result<(), StrategyError>;
}
