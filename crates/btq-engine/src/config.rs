//! Run configuration as stored in the run row's `config_json`.

use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

/// Immutable per-run inputs, deserialized from the run row's JSON config.
///
/// Exactly one of `symbols` / `portfolio_id` selects the instrument set.
/// Defaults mirror what an absent key meant in the stored JSON: 1 bps fee,
/// 2 bps slippage, NEXT_OPEN fills, equal weighting, INR equities on the
/// daily timeframe.
#[derive(Clone, Debug, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    #[serde(default)]
    pub portfolio_id: Option<Uuid>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub starting_cash_paise: i64,
    #[serde(default = "default_fee_bps")]
    pub fee_bps: i64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: i64,
    #[serde(default = "default_fill_rule")]
    pub fill_rule: String,
    #[serde(default = "default_weighting")]
    pub weighting: String,
    #[serde(default = "default_rebalance")]
    pub rebalance: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_asset_class")]
    pub asset_class: String,
    /// Inline strategy code, used when the run has no persisted strategy row.
    #[serde(default)]
    pub strategy_code: Option<String>,
}

fn default_timeframe() -> String {
    "1D".to_string()
}

fn default_fee_bps() -> i64 {
    1
}

fn default_slippage_bps() -> i64 {
    2
}

fn default_fill_rule() -> String {
    "NEXT_OPEN".to_string()
}

fn default_weighting() -> String {
    "EQUAL".to_string()
}

fn default_rebalance() -> String {
    "ONCE_AT_START".to_string()
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_asset_class() -> String {
    "EQUITY".to_string()
}

/// Config validation failures. Fatal to the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    MissingInstruments,
    AmbiguousInstruments,
    EmptySymbols,
    StartAfterEnd { start: NaiveDate, end: NaiveDate },
    NonPositiveCash { got: i64 },
    NegativeBps { field: &'static str, got: i64 },
    UnsupportedFillRule { got: String },
    UnsupportedTimeframe { got: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingInstruments => {
                write!(f, "config must set either symbols or portfolio_id")
            }
            ConfigError::AmbiguousInstruments => {
                write!(f, "config must set exactly one of symbols / portfolio_id")
            }
            ConfigError::EmptySymbols => write!(f, "symbols must not be empty"),
            ConfigError::StartAfterEnd { start, end } => {
                write!(f, "start_date {} is after end_date {}", start, end)
            }
            ConfigError::NonPositiveCash { got } => {
                write!(f, "starting_cash_paise must be > 0, got {}", got)
            }
            ConfigError::NegativeBps { field, got } => {
                write!(f, "{} must be >= 0, got {}", field, got)
            }
            ConfigError::UnsupportedFillRule { got } => {
                write!(f, "unsupported fill_rule: {}", got)
            }
            ConfigError::UnsupportedTimeframe { got } => {
                write!(f, "unsupported timeframe: {}", got)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl RunConfig {
    /// Validate the config before any engine work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.symbols, &self.portfolio_id) {
            (None, None) => return Err(ConfigError::MissingInstruments),
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousInstruments),
            (Some(symbols), None) if symbols.is_empty() => {
                return Err(ConfigError::EmptySymbols)
            }
            _ => {}
        }
        if self.start_date > self.end_date {
            return Err(ConfigError::StartAfterEnd {
                start: self.start_date,
                end: self.end_date,
            });
        }
        if self.starting_cash_paise <= 0 {
            return Err(ConfigError::NonPositiveCash {
                got: self.starting_cash_paise,
            });
        }
        if self.fee_bps < 0 {
            return Err(ConfigError::NegativeBps {
                field: "fee_bps",
                got: self.fee_bps,
            });
        }
        if self.slippage_bps < 0 {
            return Err(ConfigError::NegativeBps {
                field: "slippage_bps",
                got: self.slippage_bps,
            });
        }
        if self.fill_rule != "NEXT_OPEN" {
            return Err(ConfigError::UnsupportedFillRule {
                got: self.fill_rule.clone(),
            });
        }
        if self.timeframe != "1D" {
            return Err(ConfigError::UnsupportedTimeframe {
                got: self.timeframe.clone(),
            });
        }
        Ok(())
    }
}
