use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use scorecard_core::errors::StrategyError;
use scorecard_core::registry::StrategyContext;
use scorecard_core::strategy_api::{Strategy, StrategyInput, StrategyScore};
use serde_json::Value;
use std::sync::Arc;

/// Extracts an answer with a regex and compares it with the expected text.
///
/// The first capture group is used when the pattern has one, otherwise the
/// whole match. Without an expected response the score is whether the
/// pattern matched at all.
pub struct RegexMatchStrategy {
    name: String,
    re: Regex,
}

pub fn build(ctx: &StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> {
    let pattern = ctx.params.require_str(&ctx.name, "pattern")?;
    let mut b = RegexBuilder::new(pattern);
    apply_flags(&mut b, &flags(ctx.params.get("flags")))?;

    let re = b.build().map_err(|e| {
        StrategyError::Config(format!("invalid regex pattern '{}': {}", pattern, e))
    })?;
    Ok(Arc::new(RegexMatchStrategy {
        name: ctx.name.clone(),
        re,
    }))
}

/// Accepts `"im"` as well as `["i", "m"]`.
fn flags(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::String(s)) => s.chars().map(|c| c.to_string()).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|x| x.as_str())
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn apply_flags(b: &mut RegexBuilder, flags: &[String]) -> Result<(), StrategyError> {
    for f in flags {
        match f.as_str() {
            "i" => {
                b.case_insensitive(true);
            }
            "m" => {
                b.multi_line(true);
            }
            "s" => {
                b.dot_matches_new_line(true);
            }
            "x" => {
                b.ignore_whitespace(true);
            }
            other => {
                return Err(StrategyError::Config(format!(
                    "unknown regex flag '{}' (supported: i, m, s, x)",
                    other
                )))
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Strategy for RegexMatchStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, input: StrategyInput<'_>) -> Result<StrategyScore, StrategyError> {
        let extracted = self.re.captures(input.agent_response).and_then(|caps| {
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().trim().to_string())
        });

        let score = match (&extracted, input.expected_response) {
            (None, _) => 0.0,
            (Some(_), None) => 1.0,
            (Some(got), Some(exp)) => {
                if got.to_lowercase() == exp.trim().to_lowercase() {
                    1.0
                } else {
                    0.0
                }
            }
        };

        Ok(StrategyScore::with_details(
            score,
            serde_json::json!({
                "pattern": self.re.as_str(),
                "extracted": extracted,
            }),
        ))
    }
}
