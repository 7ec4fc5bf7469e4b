use async_trait::async_trait;
use scorecard_core::errors::StrategyError;
use scorecard_core::registry::StrategyContext;
use scorecard_core::strategy_api::{Strategy, StrategyInput, StrategyScore};
use std::sync::Arc;

pub const DEFAULT_MARKER: &str = "Answer: ";

/// Compares the answer following a marker with the expected text.
pub struct ExactMatchStrategy {
    name: String,
    marker: String,
}

pub fn build(ctx: &StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> {
    let marker = ctx.params.str("marker").unwrap_or(DEFAULT_MARKER);
    if marker.trim().is_empty() {
        return Err(StrategyError::Config(format!(
            "strategy '{}': marker must not be blank",
            ctx.name
        )));
    }
    Ok(Arc::new(ExactMatchStrategy {
        name: ctx.name.clone(),
        marker: marker.to_string(),
    }))
}

/// Text after `marker` up to the first period, trimmed and case-folded.
/// Without the marker the whole response is used.
pub fn extract_answer(response: &str, marker: &str) -> (String, bool) {
    // ASCII folding keeps byte offsets valid in the original string.
    let hay = response.to_ascii_lowercase();
    let needle = marker.to_ascii_lowercase();
    let (tail, found) = match hay.find(&needle) {
        Some(i) => (&response[i + marker.len()..], true),
        None => (response, false),
    };
    let answer = tail.split('.').next().unwrap_or_default();
    (answer.trim().to_lowercase(), found)
}

fn normalize_expected(expected: &str) -> String {
    expected.trim().trim_end_matches('.').trim().to_lowercase()
}

#[async_trait]
impl Strategy for ExactMatchStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, input: StrategyInput<'_>) -> Result<StrategyScore, StrategyError> {
        let expected = normalize_expected(input.require_expected(&self.name)?);
        let (actual, marker_found) = extract_answer(input.agent_response, &self.marker);
        let score = if actual == expected { 1.0 } else { 0.0 };

        Ok(StrategyScore::with_details(
            score,
            serde_json::json!({
                "extracted": actual,
                "expected": expected,
                "marker_found": marker_found,
            }),
        ))
    }
}
