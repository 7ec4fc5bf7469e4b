use super::RecordSource;
use crate::model::{
    Conversation, DetailStatus, ExpectedResponse, JudgePrompt, MetricSummary, Prompt, Run,
    RunDetail, RunStatus, TestCase,
};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

/// Insert payload for a test case; names are resolved to ids by the caller.
#[derive(Debug, Clone, Default)]
pub struct NewTestCase<'a> {
    pub name: &'a str,
    pub prompt_id: i64,
    pub strategy_name: &'a str,
    pub expected_response_id: Option<i64>,
    pub judge_prompt_id: Option<i64>,
    pub extra_inputs: Option<&'a BTreeMap<String, String>>,
}

pub struct StoreStats {
    pub runs: Option<u64>,
    pub run_details: Option<u64>,
    pub summaries: Option<u64>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    // --- corpus ---

    pub fn insert_prompt(
        &self,
        name: &str,
        system_prompt: Option<&str>,
        user_prompt: &str,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO prompts(name, system_prompt, user_prompt) VALUES (?1, ?2, ?3)",
            params![name, system_prompt, user_prompt],
        )
        .with_context(|| format!("insert prompt '{}'", name))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn prompt_id(&self, name: &str) -> anyhow::Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT id FROM prompts WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn insert_expected_response(&self, name: &str, text: &str) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO responses(name, text) VALUES (?1, ?2)",
            params![name, text],
        )
        .with_context(|| format!("insert response '{}'", name))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_testcase(&self, tc: &NewTestCase<'_>) -> anyhow::Result<i64> {
        let extra_json = match tc.extra_inputs {
            Some(m) if !m.is_empty() => Some(serde_json::to_string(m)?),
            _ => None,
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO testcases(
                 name, prompt_id, strategy_name, response_id, judge_prompt_id, extra_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tc.name,
                tc.prompt_id,
                tc.strategy_name,
                tc.expected_response_id,
                tc.judge_prompt_id,
                extra_json
            ],
        )
        .with_context(|| format!("insert testcase '{}'", tc.name))?;
        Ok(conn.last_insert_rowid())
    }

    // --- runs ---

    pub fn create_run(&self, name: &str, target_id: Option<i64>) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs(name, target_id, status) VALUES (?1, ?2, ?3)",
            params![name, target_id, RunStatus::Pending.as_str()],
        )
        .with_context(|| format!("insert run '{}'", name))?;
        Ok(conn.last_insert_rowid())
    }

    /// Moves a run forward; start/end timestamps are stamped on the way.
    pub fn transition_run(&self, run_id: i64, next: RunStatus) -> anyhow::Result<()> {
        let current = self
            .run_by_id(run_id)?
            .with_context(|| format!("run #{} not found", run_id))?;
        if !current.status.can_transition_to(next) {
            anyhow::bail!(
                "invalid run transition for '{}': {} -> {}",
                current.name,
                current.status,
                next
            );
        }

        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        match next {
            RunStatus::Running => conn.execute(
                "UPDATE runs SET status=?1, start_ts=?2 WHERE id=?3",
                params![next.as_str(), now, run_id],
            )?,
            _ => conn.execute(
                "UPDATE runs SET status=?1, end_ts=?2 WHERE id=?3",
                params![next.as_str(), now, run_id],
            )?,
        };
        Ok(())
    }

    pub fn insert_conversation(
        &self,
        prompt_text: &str,
        agent_response: &str,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO conversations(prompt_text, agent_response) VALUES (?1, ?2)",
            params![prompt_text, agent_response],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_run_detail(
        &self,
        run_id: i64,
        testcase_name: &str,
        conversation_id: Option<i64>,
        metric_name: &str,
        status: DetailStatus,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO run_details(run_id, testcase_name, conversation_id, metric_name, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                testcase_name,
                conversation_id,
                metric_name,
                status.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn fetch_summaries(&self, run_id: i64) -> anyhow::Result<Vec<MetricSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT metric_name, mean_score, successful_cases, failed_cases
             FROM metric_summaries WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(MetricSummary {
                    metric_name: row.get(0)?,
                    mean_score: row.get(1)?,
                    successful_cases: row.get(2)?,
                    failed_cases: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- embeddings cache ---

    pub fn get_embedding(&self, key: &str) -> anyhow::Result<Option<(String, Vec<f32>)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT model, vec FROM embeddings WHERE key = ?1 LIMIT 1")?;
        let mut rows = stmt.query(params![key])?;

        if let Some(row) = rows.next()? {
            let model: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let vec = crate::embeddings::util::decode_vec_f32(&blob)?;
            Ok(Some((model, vec)))
        } else {
            Ok(None)
        }
    }

    pub fn put_embedding(&self, key: &str, model: &str, vec: &[f32]) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let blob = crate::embeddings::util::encode_vec_f32(vec);
        let dims = vec.len() as i64;
        let created_at = chrono::Utc::now().to_rfc3339();

        conn.execute(
            "INSERT OR REPLACE INTO embeddings (key, model, dims, vec, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, model, dims, blob, created_at],
        )?;
        Ok(())
    }

    pub fn stats_best_effort(&self) -> StoreStats {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> Option<u64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
                r.get::<_, i64>(0).map(|x| x as u64)
            })
            .ok()
        };
        StoreStats {
            runs: count("runs"),
            run_details: count("run_details"),
            summaries: count("metric_summaries"),
        }
    }
}

impl RecordSource for Store {
    fn run_by_name(&self, name: &str) -> anyhow::Result<Option<Run>> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .query_row(
                "SELECT id, name, target_id, start_ts, end_ts, status FROM runs WHERE name = ?1",
                params![name],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn run_by_id(&self, id: i64) -> anyhow::Result<Option<Run>> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .query_row(
                "SELECT id, name, target_id, start_ts, end_ts, status FROM runs WHERE id = ?1",
                params![id],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn run_details(&self, run_id: i64) -> anyhow::Result<Vec<RunDetail>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, testcase_name, conversation_id, metric_name, status
             FROM run_details WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let status: String = row.get(5)?;
                Ok(RunDetail {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    testcase_name: row.get(2)?,
                    conversation_id: row.get(3)?,
                    metric_name: row.get(4)?,
                    status: DetailStatus::parse(&status).ok_or_else(|| bad_enum(5, &status))?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn testcase(&self, name: &str) -> anyhow::Result<Option<TestCase>> {
        let conn = self.conn.lock().unwrap();
        let tc = conn
            .query_row(
                "SELECT id, name, prompt_id, strategy_name, response_id, judge_prompt_id, extra_json
                 FROM testcases WHERE name = ?1",
                params![name],
                |row| {
                    let extra_json: Option<String> = row.get(6)?;
                    let extra_inputs = match extra_json {
                        Some(s) if !s.trim().is_empty() => serde_json::from_str(&s)
                            .map_err(|e| {
                                rusqlite::Error::FromSqlConversionFailure(
                                    6,
                                    rusqlite::types::Type::Text,
                                    Box::new(e),
                                )
                            })?,
                        _ => BTreeMap::new(),
                    };
                    Ok(TestCase {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        prompt_id: row.get(2)?,
                        strategy_name: row.get(3)?,
                        expected_response_id: row.get(4)?,
                        judge_prompt_id: row.get(5)?,
                        extra_inputs,
                    })
                },
            )
            .optional()?;
        Ok(tc)
    }

    fn conversation(&self, id: i64) -> anyhow::Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let c = conn
            .query_row(
                "SELECT id, prompt_text, agent_response FROM conversations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Conversation {
                        id: row.get(0)?,
                        prompt_text: row.get(1)?,
                        agent_response: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(c)
    }

    fn prompt(&self, id: i64) -> anyhow::Result<Option<Prompt>> {
        let conn = self.conn.lock().unwrap();
        let p = conn
            .query_row(
                "SELECT id, name, system_prompt, user_prompt FROM prompts WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Prompt {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        system_prompt: row.get(2)?,
                        user_prompt: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(p)
    }

    fn expected_response(&self, id: i64) -> anyhow::Result<Option<ExpectedResponse>> {
        let conn = self.conn.lock().unwrap();
        let r = conn
            .query_row(
                "SELECT id, name, text FROM responses WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ExpectedResponse {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        text: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(r)
    }

    fn judge_prompt(&self, id: i64) -> anyhow::Result<Option<JudgePrompt>> {
        let conn = self.conn.lock().unwrap();
        let j = conn
            .query_row(
                "SELECT id, name, text FROM judge_prompts WHERE id = ?1",
                params![id],
                |row| {
                    Ok(JudgePrompt {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        text: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(j)
    }

    fn append_summaries(&self, run_id: i64, summaries: &[MetricSummary]) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let created_at = chrono::Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO metric_summaries(
                     run_id, metric_name, mean_score, successful_cases, failed_cases, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for s in summaries {
                stmt.execute(params![
                    run_id,
                    s.metric_name,
                    s.mean_score,
                    s.successful_cases,
                    s.failed_cases,
                    created_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    let status: String = row.get(5)?;
    Ok(Run {
        id: row.get(0)?,
        name: row.get(1)?,
        target_id: row.get(2)?,
        start_ts: row.get(3)?,
        end_ts: row.get(4)?,
        status: RunStatus::parse(&status).ok_or_else(|| bad_enum(5, &status))?,
    })
}

fn bad_enum(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unknown status '{}'", value).into(),
    )
}
