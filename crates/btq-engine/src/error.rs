use chrono::NaiveDate;

/// Engine misuse errors. These fail the run; order-level rejections do not
/// go through here (see [`crate::types::RejectedOrder`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// Constructor parameters out of range (non-positive cash, negative bps).
    InvalidParams { field: &'static str, value: i64 },
    /// Order quantity must be strictly positive.
    InvalidQty { qty: i64 },
    /// Bars and end-of-day calls must be fed in strictly ascending date order.
    NonMonotonicDate { prev: NaiveDate, got: NaiveDate },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidParams { field, value } => {
                write!(f, "invalid engine parameter: {} = {}", field, value)
            }
            EngineError::InvalidQty { qty } => {
                write!(f, "order qty must be > 0, got {}", qty)
            }
            EngineError::NonMonotonicDate { prev, got } => {
                write!(f, "dates must strictly ascend: {} then {}", prev, got)
            }
        }
    }
}

impl std::error::Error for EngineError {}
