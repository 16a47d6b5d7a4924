//! Strategy hosting for the backtest engine.
//!
//! A strategy sees a deliberately narrow surface — [`StrategyContext`]
//! with `buy`/`sell`/`cash`/`position` — and two lifecycle hooks, `init`
//! (once) and `on_bar` (per bar). Strategies are selected by name from a
//! [`StrategyRegistry`] using the text stored in the strategies table.

pub mod builtins;
pub mod host;
pub mod registry;
pub mod types;

pub use host::StrategyHost;
pub use registry::{RegistryError, StrategyFactory, StrategyRegistry};
pub use types::{Strategy, StrategyContext, StrategyError};
