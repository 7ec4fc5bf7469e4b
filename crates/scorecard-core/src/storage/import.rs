use super::Store;
use crate::model::{DetailStatus, RunStatus};
use anyhow::Context;
use rusqlite::{params, OptionalExtension, Transaction};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A self-contained evaluation corpus plus recorded runs.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Corpus {
    #[serde(default)]
    pub metrics: Vec<CorpusMetric>,
    #[serde(default)]
    pub strategies: Vec<CorpusStrategy>,
    #[serde(default)]
    pub targets: Vec<CorpusTarget>,
    #[serde(default)]
    pub prompts: Vec<CorpusPrompt>,
    #[serde(default)]
    pub responses: Vec<CorpusResponse>,
    #[serde(default)]
    pub judge_prompts: Vec<CorpusJudgePrompt>,
    #[serde(default)]
    pub testcases: Vec<CorpusTestCase>,
    #[serde(default)]
    pub runs: Vec<CorpusRun>,
}

#[derive(Debug, Deserialize)]
pub struct CorpusMetric {
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CorpusStrategy {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CorpusTarget {
    pub name: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CorpusPrompt {
    pub name: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub user_prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct CorpusResponse {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct CorpusJudgePrompt {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct CorpusTestCase {
    pub name: String,
    pub prompt: String,
    pub strategy: String,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub judge_prompt: Option<String>,
    #[serde(default)]
    pub extra_inputs: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CorpusRun {
    pub name: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_run_status")]
    pub status: RunStatus,
    #[serde(default)]
    pub details: Vec<CorpusDetail>,
}

fn default_run_status() -> RunStatus {
    RunStatus::Completed
}

#[derive(Debug, Deserialize)]
pub struct CorpusDetail {
    pub testcase: String,
    pub metric: String,
    #[serde(default = "default_detail_status")]
    pub status: DetailStatus,
    #[serde(default)]
    pub conversation: Option<CorpusConversation>,
}

fn default_detail_status() -> DetailStatus {
    DetailStatus::Completed
}

#[derive(Debug, Deserialize)]
pub struct CorpusConversation {
    pub prompt_text: String,
    pub agent_response: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub testcases: usize,
    pub runs: usize,
    pub run_details: usize,
}

impl Corpus {
    /// YAML is a superset of JSON, so one parser covers both file types.
    pub fn from_yaml_str(s: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(s).context("failed to parse corpus")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read corpus {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("in {}", path.display()))
    }
}

impl Store {
    /// Loads a corpus atomically. Runs are recorded with the status they
    /// carry in the document; they are history, not new executions.
    pub fn import_corpus(&self, corpus: &Corpus) -> anyhow::Result<ImportStats> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let stats = import_tx(&tx, corpus)?;
        tx.commit()?;
        Ok(stats)
    }
}

fn import_tx(tx: &Transaction<'_>, corpus: &Corpus) -> anyhow::Result<ImportStats> {
    let mut stats = ImportStats::default();

    for m in &corpus.metrics {
        tx.execute(
            "INSERT INTO metrics(name, domain) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET domain=excluded.domain",
            params![m.name, m.domain],
        )?;
    }
    for s in &corpus.strategies {
        tx.execute(
            "INSERT INTO strategies(name, description) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET description=excluded.description",
            params![s.name, s.description],
        )?;
    }
    for t in &corpus.targets {
        tx.execute(
            "INSERT INTO targets(name, endpoint) VALUES (?1, ?2)",
            params![t.name, t.endpoint],
        )
        .with_context(|| format!("target '{}'", t.name))?;
    }
    for p in &corpus.prompts {
        tx.execute(
            "INSERT INTO prompts(name, system_prompt, user_prompt) VALUES (?1, ?2, ?3)",
            params![p.name, p.system_prompt, p.user_prompt],
        )
        .with_context(|| format!("prompt '{}'", p.name))?;
    }
    for r in &corpus.responses {
        tx.execute(
            "INSERT INTO responses(name, text) VALUES (?1, ?2)",
            params![r.name, r.text],
        )
        .with_context(|| format!("response '{}'", r.name))?;
    }
    for j in &corpus.judge_prompts {
        tx.execute(
            "INSERT INTO judge_prompts(name, text) VALUES (?1, ?2)",
            params![j.name, j.text],
        )
        .with_context(|| format!("judge prompt '{}'", j.name))?;
    }

    for tc in &corpus.testcases {
        let prompt_id = lookup(tx, "prompts", &tc.prompt)?.with_context(|| {
            format!("testcase '{}' references unknown prompt '{}'", tc.name, tc.prompt)
        })?;
        let response_id = match &tc.response {
            Some(name) => Some(lookup(tx, "responses", name)?.with_context(|| {
                format!("testcase '{}' references unknown response '{}'", tc.name, name)
            })?),
            None => None,
        };
        let judge_id = match &tc.judge_prompt {
            Some(name) => Some(lookup(tx, "judge_prompts", name)?.with_context(|| {
                format!(
                    "testcase '{}' references unknown judge prompt '{}'",
                    tc.name, name
                )
            })?),
            None => None,
        };
        let extra_json = if tc.extra_inputs.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&tc.extra_inputs)?)
        };
        tx.execute(
            "INSERT INTO testcases(
                 name, prompt_id, strategy_name, response_id, judge_prompt_id, extra_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![tc.name, prompt_id, tc.strategy, response_id, judge_id, extra_json],
        )
        .with_context(|| format!("testcase '{}'", tc.name))?;
        stats.testcases += 1;
    }

    let now = chrono::Utc::now().to_rfc3339();
    for run in &corpus.runs {
        let target_id = match &run.target {
            Some(name) => Some(lookup(tx, "targets", name)?.with_context(|| {
                format!("run '{}' references unknown target '{}'", run.name, name)
            })?),
            None => None,
        };
        let start_ts = (run.status != RunStatus::Pending).then(|| now.clone());
        let end_ts = run.status.is_terminal().then(|| now.clone());
        tx.execute(
            "INSERT INTO runs(name, target_id, start_ts, end_ts, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run.name, target_id, start_ts, end_ts, run.status.as_str()],
        )
        .with_context(|| format!("run '{}'", run.name))?;
        let run_id = tx.last_insert_rowid();
        stats.runs += 1;

        for d in &run.details {
            let conversation_id = match &d.conversation {
                Some(c) => {
                    tx.execute(
                        "INSERT INTO conversations(prompt_text, agent_response) VALUES (?1, ?2)",
                        params![c.prompt_text, c.agent_response],
                    )?;
                    Some(tx.last_insert_rowid())
                }
                None => None,
            };
            tx.execute(
                "INSERT INTO run_details(
                     run_id, testcase_name, conversation_id, metric_name, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![run_id, d.testcase, conversation_id, d.metric, d.status.as_str()],
            )?;
            stats.run_details += 1;
        }
    }

    Ok(stats)
}

fn lookup(tx: &Transaction<'_>, table: &str, name: &str) -> anyhow::Result<Option<i64>> {
    let id = tx
        .query_row(
            &format!("SELECT id FROM {} WHERE name = ?1", table),
            params![name],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RecordSource;

    const CORPUS: &str = r#"
metrics:
  - { name: Truthfulness, domain: qa }
prompts:
  - name: capital_fr
    user_prompt: "What is the capital of France?"
responses:
  - { name: capital_fr_answer, text: "paris" }
testcases:
  - name: tc_capital
    prompt: capital_fr
    strategy: truthfulness_external
    response: capital_fr_answer
runs:
  - name: nightly
    details:
      - testcase: tc_capital
        metric: Truthfulness
        conversation:
          prompt_text: "What is the capital of France?"
          agent_response: "Answer: Paris."
      - testcase: tc_capital
        metric: Truthfulness
        status: SKIPPED
"#;

    #[test]
    fn imports_runs_with_details() -> anyhow::Result<()> {
        let store = Store::memory()?;
        store.init_schema()?;
        let stats = store.import_corpus(&Corpus::from_yaml_str(CORPUS)?)?;
        assert_eq!(
            stats,
            ImportStats {
                testcases: 1,
                runs: 1,
                run_details: 2
            }
        );

        let run = store.run_by_name("nightly")?.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        let details = store.run_details(run.id)?;
        assert_eq!(details[0].status, DetailStatus::Completed);
        assert_eq!(details[1].status, DetailStatus::Skipped);
        assert!(details[1].conversation_id.is_none());
        Ok(())
    }

    #[test]
    fn dangling_reference_rolls_back_everything() -> anyhow::Result<()> {
        let store = Store::memory()?;
        store.init_schema()?;
        let bad = r#"
prompts:
  - { name: p, user_prompt: "hi" }
testcases:
  - { name: t, prompt: nope, strategy: exact_match }
"#;
        let err = store
            .import_corpus(&Corpus::from_yaml_str(bad)?)
            .unwrap_err();
        assert!(err.to_string().contains("unknown prompt 'nope'"));
        assert!(store.prompt_id("p")?.is_none());
        Ok(())
    }
}
