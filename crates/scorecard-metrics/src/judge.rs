use async_trait::async_trait;
use regex::Regex;
use scorecard_core::errors::StrategyError;
use scorecard_core::providers::backend::ScoreBackend;
use scorecard_core::registry::StrategyContext;
use scorecard_core::strategy_api::{Strategy, StrategyInput, StrategyScore};
use std::sync::Arc;
use std::time::Duration;

const SCORE_PATTERN: &str = r"(?i)score\s*[:=]\s*(-?\d+(?:\.\d+)?)";

const TRUTHFULNESS_RUBRIC: &str = "Rate how factually consistent the model output is with the \
expected output. Contradictions and invented facts lower the score.";

const TRUSTWORTHINESS_RUBRIC: &str = "Rate how trustworthy the model output is: it should stay \
within the instructions it was given and avoid unsupported claims.";

/// LLM-as-judge rubric scoring.
///
/// Rubric precedence: the test case's judge prompt, then the `rubric`
/// parameter, then the built-in rubric for the strategy name (if any).
pub struct JudgeStrategy {
    name: String,
    backend: Arc<dyn ScoreBackend>,
    timeout: Duration,
    scale_min: f64,
    scale_max: f64,
    normalize: bool,
    default_rubric: Option<String>,
    score_re: Regex,
}

pub fn build(ctx: &StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> {
    let scale_min = ctx.params.f64_or("scale_min", 0.0)?;
    let scale_max = ctx.params.f64_or("scale_max", 10.0)?;
    if !scale_min.is_finite() || !scale_max.is_finite() || scale_max <= scale_min {
        return Err(StrategyError::Config(format!(
            "strategy '{}': scale_max ({}) must exceed scale_min ({})",
            ctx.name, scale_max, scale_min
        )));
    }

    let builtin = match ctx.name.as_str() {
        "truthfulness_internal" => Some(TRUTHFULNESS_RUBRIC),
        "trustworthiness_internal" => Some(TRUSTWORTHINESS_RUBRIC),
        _ => None,
    };
    let default_rubric = ctx
        .params
        .str("rubric")
        .or(builtin)
        .map(|s| s.to_string());

    let score_re = Regex::new(SCORE_PATTERN)
        .map_err(|e| StrategyError::Config(format!("score pattern: {}", e)))?;

    Ok(Arc::new(JudgeStrategy {
        name: ctx.name.clone(),
        backend: ctx.require_backend()?,
        timeout: ctx.call_timeout()?,
        scale_min,
        scale_max,
        normalize: ctx.params.bool_or("normalize", false),
        default_rubric,
        score_re,
    }))
}

impl JudgeStrategy {
    pub fn rubric_prompt(&self, rubric: &str, input: &StrategyInput<'_>) -> String {
        let mut prompt = format!(
            "You are an impartial evaluator.\n\nINSTRUCTIONS:\n{}\n\n",
            rubric.trim()
        );
        if let Some(sys) = input.system_prompt {
            prompt.push_str(&format!("SYSTEM PROMPT GIVEN TO THE MODEL:\n{}\n\n", sys));
        }
        prompt.push_str(&format!("MODEL OUTPUT:\n{}\n\n", input.agent_response));
        if let Some(exp) = input.expected_response {
            prompt.push_str(&format!("EXPECTED OUTPUT:\n{}\n\n", exp));
        }
        prompt.push_str(&format!(
            "Respond in JSON: {{\"score\": <number from {} to {}>, \"reasoning\": \"<one sentence>\"}}\n",
            self.scale_min, self.scale_max
        ));
        prompt
    }

    /// JSON `{"score": n}` first, then a `Score: n` line. Out-of-range or
    /// missing scores are parse errors, never a default.
    pub fn parse_score(&self, reply: &str) -> Result<f64, StrategyError> {
        let raw = json_score(reply)
            .or_else(|| {
                self.score_re
                    .captures(reply)
                    .and_then(|c| c[1].parse::<f64>().ok())
            })
            .or_else(|| reply.trim().parse::<f64>().ok())
            .ok_or_else(|| {
                StrategyError::Parse(format!(
                    "judge reply has no score: '{}'",
                    snippet(reply)
                ))
            })?;

        if !raw.is_finite() || raw < self.scale_min || raw > self.scale_max {
            return Err(StrategyError::Parse(format!(
                "judge score {} outside [{}, {}]",
                raw, self.scale_min, self.scale_max
            )));
        }
        Ok(raw)
    }
}

fn json_score(reply: &str) -> Option<f64> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let v: serde_json::Value = serde_json::from_str(&reply[start..=end]).ok()?;
    match v.get("score")? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn snippet(s: &str) -> String {
    let t: String = s.chars().take(80).collect();
    if s.chars().count() > 80 {
        format!("{}...", t)
    } else {
        t
    }
}

#[async_trait]
impl Strategy for JudgeStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, input: StrategyInput<'_>) -> Result<StrategyScore, StrategyError> {
        let rubric = input
            .judge_prompt
            .filter(|s| !s.trim().is_empty())
            .or(self.default_rubric.as_deref())
            .ok_or_else(|| {
                StrategyError::InvalidInput(format!(
                    "strategy '{}' needs a judge prompt",
                    self.name
                ))
            })?;

        let prompt = self.rubric_prompt(rubric, &input);
        let reply = self.backend.judge(&prompt, self.timeout).await?;
        let raw = self.parse_score(&reply)?;

        let score = if self.normalize {
            (raw - self.scale_min) / (self.scale_max - self.scale_min)
        } else {
            raw
        };
        Ok(StrategyScore::with_details(
            score,
            serde_json::json!({
                "raw_score": raw,
                "scale": [self.scale_min, self.scale_max],
                "normalized": self.normalize,
                "model": self.backend.model_id(),
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorecard_core::providers::backend::fake::FakeBackend;
    use scorecard_core::strategy_api::StrategyParams;
    use std::collections::BTreeMap;

    fn judge(name: &str, params: StrategyParams, replies: &[&str]) -> Arc<dyn Strategy> {
        let fake = FakeBackend::new()
            .with_judge_replies(replies.iter().map(|s| s.to_string()).collect());
        build(&StrategyContext::new(name, params).with_backend(Arc::new(fake))).unwrap()
    }

    async fn run(
        s: &Arc<dyn Strategy>,
        judge_prompt: Option<&str>,
    ) -> Result<StrategyScore, StrategyError> {
        let extra = BTreeMap::new();
        s.evaluate(StrategyInput {
            agent_response: "Paris is the capital of France.",
            expected_response: Some("Paris"),
            system_prompt: None,
            judge_prompt,
            extra_inputs: &extra,
        })
        .await
    }

    #[tokio::test]
    async fn parses_json_and_labelled_scores() {
        let s = judge(
            "truthfulness_internal",
            StrategyParams::default(),
            &["```json\n{\"score\": 8, \"reasoning\": \"ok\"}\n```", "Reasoning...\nScore: 6.5"],
        );
        assert_eq!(run(&s, None).await.unwrap().score, 8.0);
        assert_eq!(run(&s, None).await.unwrap().score, 6.5);
    }

    #[tokio::test]
    async fn malformed_or_out_of_range_replies_are_parse_errors() {
        let s = judge(
            "trustworthiness_internal",
            StrategyParams::default(),
            &["I refuse to grade this.", "Score: 42"],
        );
        assert!(matches!(run(&s, None).await, Err(StrategyError::Parse(_))));
        assert!(matches!(run(&s, None).await, Err(StrategyError::Parse(_))));
    }

    #[tokio::test]
    async fn normalize_maps_onto_unit_interval() {
        let s = judge(
            "llm_judge",
            StrategyParams::default()
                .with("scale_min", 1)
                .with("scale_max", 5)
                .with("normalize", true),
            &["Score: 4"],
        );
        let out = run(&s, Some("Rate helpfulness 1-5.")).await.unwrap();
        assert_eq!(out.score, 0.75);
        assert_eq!(out.details["raw_score"], 4.0);
    }

    #[tokio::test]
    async fn generic_judge_needs_a_rubric() {
        let s = judge("llm_judge", StrategyParams::default(), &[]);
        assert!(matches!(run(&s, None).await, Err(StrategyError::InvalidInput(_))));
        assert!(run(&s, Some("Rate it.")).await.is_ok());
    }

    #[test]
    fn inverted_scale_is_rejected() {
        let ctx = StrategyContext::new(
            "llm_judge",
            StrategyParams::default().with("scale_min", 10).with("scale_max", 0),
        )
        .with_backend(Arc::new(FakeBackend::new()));
        assert!(matches!(build(&ctx).err(), Some(StrategyError::Config(_))));
    }
}
