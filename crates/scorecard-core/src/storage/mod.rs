use crate::model::{
    Conversation, ExpectedResponse, JudgePrompt, MetricSummary, Prompt, Run, RunDetail, TestCase,
};

pub mod import;
pub mod schema;
pub mod store;

pub use store::Store;

/// Read side of the persistence collaborator, plus the one append-only
/// write the engine performs (metric summaries).
pub trait RecordSource: Send + Sync {
    fn run_by_name(&self, name: &str) -> anyhow::Result<Option<Run>>;
    fn run_by_id(&self, id: i64) -> anyhow::Result<Option<Run>>;
    fn run_details(&self, run_id: i64) -> anyhow::Result<Vec<RunDetail>>;
    fn testcase(&self, name: &str) -> anyhow::Result<Option<TestCase>>;
    fn conversation(&self, id: i64) -> anyhow::Result<Option<Conversation>>;
    fn prompt(&self, id: i64) -> anyhow::Result<Option<Prompt>>;
    fn expected_response(&self, id: i64) -> anyhow::Result<Option<ExpectedResponse>>;
    fn judge_prompt(&self, id: i64) -> anyhow::Result<Option<JudgePrompt>>;
    fn append_summaries(&self, run_id: i64, summaries: &[MetricSummary]) -> anyhow::Result<()>;
}
