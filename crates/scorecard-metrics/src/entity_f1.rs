use async_trait::async_trait;
use regex::Regex;
use scorecard_core::errors::StrategyError;
use scorecard_core::registry::StrategyContext;
use scorecard_core::strategy_api::{Strategy, StrategyInput, StrategyScore};
use std::collections::BTreeSet;
use std::sync::Arc;

const PAIR_PATTERN: &str = r"\(\s*([^,()]+?)\s*,\s*([^()]+?)\s*\)";

pub type EntityPair = (String, String);

/// F1 over `(entity, TAG)` pairs found in expected and actual text.
pub struct EntityF1Strategy {
    name: String,
    pair_re: Regex,
}

pub fn build(ctx: &StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> {
    let pair_re = Regex::new(PAIR_PATTERN)
        .map_err(|e| StrategyError::Config(format!("entity pattern: {}", e)))?;
    Ok(Arc::new(EntityF1Strategy {
        name: ctx.name.clone(),
        pair_re,
    }))
}

impl EntityF1Strategy {
    pub fn pairs(&self, text: &str) -> BTreeSet<EntityPair> {
        self.pair_re
            .captures_iter(text)
            .map(|c| (c[1].trim().to_lowercase(), c[2].trim().to_uppercase()))
            .filter(|(e, t)| !e.is_empty() && !t.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrfScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

pub fn prf(expected: &BTreeSet<EntityPair>, actual: &BTreeSet<EntityPair>) -> PrfScores {
    let tp = expected.intersection(actual).count() as f64;
    let ratio = |den: usize| if den == 0 { 0.0 } else { tp / den as f64 };
    let precision = ratio(actual.len());
    let recall = ratio(expected.len());
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    PrfScores {
        precision,
        recall,
        f1: round4(f1),
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[async_trait]
impl Strategy for EntityF1Strategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, input: StrategyInput<'_>) -> Result<StrategyScore, StrategyError> {
        let expected_text = input.require_expected(&self.name)?;
        let expected = self.pairs(expected_text);
        if expected.is_empty() {
            return Err(StrategyError::InvalidInput(
                "expected response contains no (entity, tag) pairs".into(),
            ));
        }
        let actual = self.pairs(input.agent_response);
        let s = prf(&expected, &actual);

        Ok(StrategyScore::with_details(
            s.f1,
            serde_json::json!({
                "precision": s.precision,
                "recall": s.recall,
                "expected_pairs": expected.len(),
                "actual_pairs": actual.len(),
            }),
        ))
    }
}
