use crate::errors::StrategyError;
use crate::model::ResolvedItem;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Everything one `evaluate` call may look at.
#[derive(Debug, Clone, Copy)]
pub struct StrategyInput<'a> {
    pub agent_response: &'a str,
    pub expected_response: Option<&'a str>,
    pub system_prompt: Option<&'a str>,
    pub judge_prompt: Option<&'a str>,
    pub extra_inputs: &'a BTreeMap<String, String>,
}

impl<'a> StrategyInput<'a> {
    pub fn from_item(item: &'a ResolvedItem) -> Self {
        Self {
            agent_response: &item.agent_response,
            expected_response: item.expected_response.as_deref(),
            system_prompt: item.system_prompt.as_deref(),
            judge_prompt: item.judge_prompt.as_deref(),
            extra_inputs: &item.extra_inputs,
        }
    }

    pub fn require_expected(&self, strategy: &str) -> Result<&'a str, StrategyError> {
        self.expected_response.ok_or_else(|| {
            StrategyError::InvalidInput(format!(
                "strategy '{}' needs an expected response",
                strategy
            ))
        })
    }

    pub fn extra(&self, key: &str) -> Option<&'a str> {
        self.extra_inputs.get(key).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyScore {
    pub score: f64,
    pub details: Value,
}

impl StrategyScore {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            details: serde_json::json!({}),
        }
    }

    pub fn with_details(score: f64, details: Value) -> Self {
        Self { score, details }
    }
}

/// A named scoring algorithm. Implementations are shared across workers, so
/// `evaluate` must not mutate anything beyond memoized resource handles.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, input: StrategyInput<'_>) -> Result<StrategyScore, StrategyError>;
}

/// Open-ended `{key: value}` configuration a strategy is constructed with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyParams {
    values: Map<String, Value>,
}

impl StrategyParams {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn from_value(v: &Value) -> Self {
        match v.as_object() {
            Some(obj) => Self::new(obj.clone()),
            None => Self::default(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn require_str(&self, strategy: &str, key: &str) -> Result<&str, StrategyError> {
        match self.str(key) {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(StrategyError::missing_param(strategy, key)),
        }
    }

    /// Numbers may also arrive as strings from hand-written configs.
    pub fn f64(&self, key: &str) -> Result<Option<f64>, StrategyError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| {
                StrategyError::Config(format!("parameter '{}' is not a number: '{}'", key, s))
            }),
            Some(other) => Err(StrategyError::Config(format!(
                "parameter '{}' is not a number: {}",
                key, other
            ))),
        }
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64, StrategyError> {
        Ok(self.f64(key)?.unwrap_or(default))
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "yes" | "1"),
            _ => default,
        }
    }

    pub fn timeout(&self) -> Result<Duration, StrategyError> {
        let secs = self.f64_or("timeout_seconds", DEFAULT_TIMEOUT_SECS as f64)?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(StrategyError::Config(format!(
                "timeout_seconds must be positive, got {}",
                secs
            )));
        }
        Duration::try_from_secs_f64(secs).map_err(|e| {
            StrategyError::Config(format!("timeout_seconds {} is out of range: {}", secs, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_parse_numbers_and_strings() {
        let p = StrategyParams::from_value(&json!({
            "threshold": 0.8,
            "window_minutes": "30",
            "bad": "abc"
        }));
        assert_eq!(p.f64("threshold").unwrap(), Some(0.8));
        assert_eq!(p.f64("window_minutes").unwrap(), Some(30.0));
        assert_eq!(p.f64("missing").unwrap(), None);
        assert!(matches!(p.f64("bad"), Err(StrategyError::Config(_))));
    }

    #[test]
    fn require_str_rejects_blank() {
        let p = StrategyParams::default().with("file_path", "  ");
        let err = p.require_str("turn_around_time", "file_path").unwrap_err();
        assert_eq!(
            err.to_string(),
            "config error: strategy 'turn_around_time' requires parameter 'file_path'"
        );
    }

    #[test]
    fn timeout_defaults_and_validates() {
        assert_eq!(
            StrategyParams::default().timeout().unwrap(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        );
        let p = StrategyParams::default().with("timeout_seconds", 0);
        assert!(p.timeout().is_err());
    }

    #[test]
    fn huge_timeout_is_a_config_error() {
        let p = StrategyParams::default().with("timeout_seconds", 1e30);
        assert!(matches!(p.timeout(), Err(StrategyError::Config(m)) if m.contains("out of range")));

        let p = StrategyParams::default().with("timeout_seconds", 2.5);
        assert_eq!(p.timeout().unwrap(), Duration::from_millis(2500));
    }
}
