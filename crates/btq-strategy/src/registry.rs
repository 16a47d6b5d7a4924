//! By-name catalogue of available strategies.
//!
//! The persistent `strategies.code` column carries either a bare registry
//! name (`"buy_and_hold"`) or a JSON object selecting a strategy with
//! parameters (`{"strategy": "sma_cross", "params": {"fast": 5, "slow":
//! 20}}`). [`StrategyRegistry::resolve`] turns that text into a fresh
//! strategy instance; anything it cannot resolve fails the run.

use serde::Deserialize;
use serde_json::Value;

use crate::builtins;
use crate::types::Strategy;

/// A thread-safe factory producing a fresh strategy instance from params.
///
/// `Send + Sync` so a single registry can be shared by the worker across
/// runs. Each call must produce an independent instance: strategies carry
/// mutable state that must not leak between runs.
pub type StrategyFactory =
    Box<dyn Fn(&Value) -> Result<Box<dyn Strategy>, RegistryError> + Send + Sync>;

/// Errors resolving strategy code into an instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    EmptyCode,
    MalformedCode { reason: String },
    UnknownStrategy { name: String },
    DuplicateName { name: String },
    InvalidParams { name: String, reason: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::EmptyCode => write!(f, "strategy code is empty"),
            RegistryError::MalformedCode { reason } => {
                write!(f, "strategy code is not valid JSON: {}", reason)
            }
            RegistryError::UnknownStrategy { name } => {
                write!(f, "no strategy named '{}' is registered", name)
            }
            RegistryError::DuplicateName { name } => {
                write!(f, "strategy '{}' is already registered", name)
            }
            RegistryError::InvalidParams { name, reason } => {
                write!(f, "invalid params for strategy '{}': {}", name, reason)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// JSON form of the code column.
#[derive(Debug, Deserialize)]
struct CodeSpec {
    strategy: String,
    #[serde(default)]
    params: Value,
}

/// Catalogue of strategy factories. Insertion order is preserved in
/// `names()` output.
pub struct StrategyRegistry {
    entries: Vec<(String, StrategyFactory)>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// A registry preloaded with the built-in strategies.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        builtins::register_builtins(&mut reg);
        reg
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&Value) -> Result<Box<dyn Strategy>, RegistryError> + Send + Sync + 'static,
    {
        let name = name.into();
        debug_assert!(!name.trim().is_empty());
        if self.contains(&name) {
            return Err(RegistryError::DuplicateName { name });
        }
        self.entries.push((name, Box::new(factory)));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Registered names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Instantiate a strategy by name. Each call produces a fresh instance.
    pub fn instantiate(
        &self,
        name: &str,
        params: &Value,
    ) -> Result<Box<dyn Strategy>, RegistryError> {
        let factory = self
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
            .ok_or_else(|| RegistryError::UnknownStrategy {
                name: name.to_string(),
            })?;
        factory(params)
    }

    /// Resolve stored strategy code (bare name or JSON spec) into an
    /// instance.
    pub fn resolve(&self, code: &str) -> Result<Box<dyn Strategy>, RegistryError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(RegistryError::EmptyCode);
        }
        if code.starts_with('{') {
            let spec: CodeSpec =
                serde_json::from_str(code).map_err(|e| RegistryError::MalformedCode {
                    reason: e.to_string(),
                })?;
            return self.instantiate(&spec.strategy, &spec.params);
        }
        self.instantiate(code, &Value::Null)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_in_order() {
        let reg = StrategyRegistry::with_builtins();
        assert_eq!(reg.names(), ["noop", "buy_and_hold", "sma_cross"]);
    }

    #[test]
    fn resolve_bare_name() {
        let reg = StrategyRegistry::with_builtins();
        let s = reg.resolve("noop").unwrap();
        assert_eq!(s.name(), "noop");
    }

    #[test]
    fn resolve_trims_whitespace() {
        let reg = StrategyRegistry::with_builtins();
        assert_eq!(reg.resolve("  buy_and_hold\n").unwrap().name(), "buy_and_hold");
    }

    #[test]
    fn resolve_json_spec_with_params() {
        let reg = StrategyRegistry::with_builtins();
        let s = reg
            .resolve(r#"{"strategy": "sma_cross", "params": {"fast": 3, "slow": 8, "qty": 2}}"#)
            .unwrap();
        assert_eq!(s.name(), "sma_cross");
    }

    #[test]
    fn resolve_rejects_empty_and_unknown() {
        let reg = StrategyRegistry::with_builtins();
        assert!(matches!(
            reg.resolve("   ").map(|_| ()),
            Err(RegistryError::EmptyCode)
        ));
        assert!(matches!(
            reg.resolve("momentum_9000").map(|_| ()),
            Err(RegistryError::UnknownStrategy { name }) if name == "momentum_9000"
        ));
    }

    #[test]
    fn resolve_rejects_malformed_json() {
        let reg = StrategyRegistry::with_builtins();
        assert!(matches!(
            reg.resolve(r#"{"strategy": "#).map(|_| ()),
            Err(RegistryError::MalformedCode { .. })
        ));
    }

    #[test]
    fn duplicate_registration_errors() {
        let mut reg = StrategyRegistry::with_builtins();
        let err = reg.register("noop", |_| {
            Ok(Box::new(crate::builtins::Noop) as Box<dyn Strategy>)
        });
        assert_eq!(
            err,
            Err(RegistryError::DuplicateName {
                name: "noop".to_string()
            })
        );
    }
}
