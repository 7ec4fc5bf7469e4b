use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub user_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpectedResponse {
    pub id: i64,
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgePrompt {
    pub id: i64,
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub id: i64,
    pub name: String,
    pub prompt_id: i64,
    pub strategy_name: String,
    #[serde(default)]
    pub expected_response_id: Option<i64>,
    #[serde(default)]
    pub judge_prompt_id: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_inputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RunStatus::Pending),
            "RUNNING" => Some(RunStatus::Running),
            "COMPLETED" => Some(RunStatus::Completed),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    /// PENDING -> RUNNING -> {COMPLETED | FAILED}, never backwards.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub target_id: Option<i64>,
    #[serde(default)]
    pub start_ts: Option<String>,
    #[serde(default)]
    pub end_ts: Option<String>,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetailStatus {
    Pending,
    Completed,
    Skipped,
}

impl DetailStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DetailStatus::Pending),
            "COMPLETED" => Some(DetailStatus::Completed),
            "SKIPPED" => Some(DetailStatus::Skipped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetailStatus::Pending => "PENDING",
            DetailStatus::Completed => "COMPLETED",
            DetailStatus::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunDetail {
    pub id: i64,
    pub run_id: i64,
    pub testcase_name: String,
    #[serde(default)]
    pub conversation_id: Option<i64>,
    pub metric_name: String,
    pub status: DetailStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: i64,
    pub prompt_text: String,
    pub agent_response: String,
}

/// How a caller names the run to analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRef {
    Id(i64),
    Name(String),
}

impl fmt::Display for RunRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunRef::Id(id) => write!(f, "#{}", id),
            RunRef::Name(name) => f.write_str(name),
        }
    }
}

/// `strategy_name:metric_name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub strategy_name: String,
    pub metric_name: String,
}

impl GroupKey {
    pub fn new(strategy_name: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            metric_name: metric_name.into(),
        }
    }

    /// Splits on the first ':' so metric names may themselves contain colons.
    pub fn parse(s: &str) -> Option<Self> {
        let (strategy, metric) = s.split_once(':')?;
        if strategy.is_empty() || metric.is_empty() {
            return None;
        }
        Some(Self::new(strategy, metric))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.strategy_name, self.metric_name)
    }
}

/// One RunDetail with everything a strategy needs already looked up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedItem {
    pub detail_id: i64,
    pub testcase_name: String,
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub judge_prompt: Option<String>,
    pub agent_response: String,
    #[serde(default)]
    pub expected_response: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_inputs: BTreeMap<String, String>,
}

/// Exactly one of `score` and `error` is set; only the constructors build one.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScoreResult {
    pub testcase_name: String,
    pub metric_name: String,
    pub strategy_name: String,
    score: Option<f64>,
    error: Option<String>,
    pub details: serde_json::Value,
}

impl ScoreResult {
    pub fn scored(key: &GroupKey, testcase_name: &str, score: f64) -> Self {
        Self {
            testcase_name: testcase_name.to_string(),
            metric_name: key.metric_name.clone(),
            strategy_name: key.strategy_name.clone(),
            score: Some(score),
            error: None,
            details: serde_json::json!({}),
        }
    }

    pub fn failed(key: &GroupKey, testcase_name: &str, error: impl Into<String>) -> Self {
        Self {
            testcase_name: testcase_name.to_string(),
            metric_name: key.metric_name.clone(),
            strategy_name: key.strategy_name.clone(),
            score: None,
            error: Some(error.into()),
            details: serde_json::json!({}),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.score.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSummary {
    pub metric_name: String,
    pub mean_score: Option<f64>,
    pub successful_cases: u32,
    pub failed_cases: u32,
}

impl MetricSummary {
    pub fn total_cases(&self) -> u32 {
        self.successful_cases + self.failed_cases
    }
}

/// A detail left out of scoring; not an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkipNote {
    pub detail_id: i64,
    pub testcase_name: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_key_roundtrips_through_display() {
        let key = GroupKey::new("truthfulness_external", "Truthfulness");
        assert_eq!(key.to_string(), "truthfulness_external:Truthfulness");
        assert_eq!(GroupKey::parse(&key.to_string()), Some(key));
    }

    #[test]
    fn group_key_keeps_colons_in_metric() {
        let key = GroupKey::parse("llm_judge:Truthfulness:Internal").unwrap();
        assert_eq!(key.strategy_name, "llm_judge");
        assert_eq!(key.metric_name, "Truthfulness:Internal");
        assert!(GroupKey::parse("no-separator").is_none());
        assert!(GroupKey::parse(":metric").is_none());
    }

    #[test]
    fn score_result_serializes_score_xor_error() {
        let key = GroupKey::new("exact_match", "Truthfulness");
        let ok = serde_json::to_value(ScoreResult::scored(&key, "tc", 0.5)).unwrap();
        assert_eq!(ok["score"], 0.5);
        assert!(ok["error"].is_null());

        let bad = serde_json::to_value(ScoreResult::failed(&key, "tc", "boom")).unwrap();
        assert!(bad["score"].is_null());
        assert_eq!(bad["error"], "boom");
        assert_eq!(bad["strategy_name"], "exact_match");
    }

    #[test]
    fn run_status_only_moves_forward() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Pending));
    }

    #[test]
    fn score_result_is_either_score_or_error() {
        let key = GroupKey::new("s", "m");
        let ok = ScoreResult::scored(&key, "t1", 0.5);
        assert_eq!(ok.score(), Some(0.5));
        assert!(ok.error().is_none());

        let bad = ScoreResult::failed(&key, "t2", "boom");
        assert!(bad.score().is_none());
        assert_eq!(bad.error(), Some("boom"));
    }
}
