use crate::errors::AnalysisError;
use crate::model::{DetailStatus, GroupKey, ResolvedItem, Run, RunDetail, RunStatus, SkipNote};
use crate::storage::RecordSource;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: GroupKey,
    pub items: Vec<ResolvedItem>,
}

/// Groups in order of first appearance; items keep their detail order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Grouping {
    pub groups: Vec<Group>,
    pub skipped: Vec<SkipNote>,
}

impl Grouping {
    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }

    fn push(&mut self, index: &mut HashMap<GroupKey, usize>, key: GroupKey, item: ResolvedItem) {
        match index.get(&key) {
            Some(&i) => self.groups[i].items.push(item),
            None => {
                index.insert(key.clone(), self.groups.len());
                self.groups.push(Group {
                    key,
                    items: vec![item],
                });
            }
        }
    }
}

pub struct RunDetailGrouper {
    source: Arc<dyn RecordSource>,
}

impl RunDetailGrouper {
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self { source }
    }

    /// Fails only on run-level preconditions; a detail that cannot be
    /// resolved is logged and noted, never fatal.
    pub fn group(&self, run: &Run) -> Result<Grouping, AnalysisError> {
        if run.status != RunStatus::Completed {
            return Err(AnalysisError::RunNotCompleted {
                run: run.name.clone(),
                status: run.status.to_string(),
            });
        }

        let details = self.source.run_details(run.id)?;
        if details.is_empty() {
            return Err(AnalysisError::NoRunDetails(run.name.clone()));
        }

        let mut out = Grouping::default();
        let mut index = HashMap::new();

        for detail in &details {
            if detail.status != DetailStatus::Completed {
                tracing::info!(
                    event = "detail_skipped",
                    run = %run.name,
                    detail_id = detail.id,
                    testcase = %detail.testcase_name,
                    status = detail.status.as_str(),
                );
                out.skipped.push(SkipNote {
                    detail_id: detail.id,
                    testcase_name: detail.testcase_name.clone(),
                    reason: format!("detail status is {}", detail.status.as_str()),
                });
                continue;
            }

            match self.resolve(detail) {
                Ok((key, item)) => out.push(&mut index, key, item),
                Err(reason) => {
                    tracing::warn!(
                        event = "detail_unresolved",
                        run = %run.name,
                        detail_id = detail.id,
                        testcase = %detail.testcase_name,
                        reason = %reason,
                    );
                    out.skipped.push(SkipNote {
                        detail_id: detail.id,
                        testcase_name: detail.testcase_name.clone(),
                        reason,
                    });
                }
            }
        }

        Ok(out)
    }

    fn resolve(&self, detail: &RunDetail) -> Result<(GroupKey, ResolvedItem), String> {
        let src = self.source.as_ref();
        let lookup_err = |what: &str, e: anyhow::Error| format!("failed to load {}: {:#}", what, e);

        let tc = src
            .testcase(&detail.testcase_name)
            .map_err(|e| lookup_err("testcase", e))?
            .ok_or_else(|| format!("testcase '{}' not found", detail.testcase_name))?;

        if tc.strategy_name.trim().is_empty() {
            return Err(format!("testcase '{}' names no strategy", tc.name));
        }

        let conversation_id = detail
            .conversation_id
            .ok_or_else(|| "detail has no conversation".to_string())?;
        let conversation = src
            .conversation(conversation_id)
            .map_err(|e| lookup_err("conversation", e))?
            .ok_or_else(|| format!("conversation #{} not found", conversation_id))?;

        let prompt = src
            .prompt(tc.prompt_id)
            .map_err(|e| lookup_err("prompt", e))?
            .ok_or_else(|| format!("prompt #{} not found", tc.prompt_id))?;

        let expected_response = match tc.expected_response_id {
            Some(id) => Some(
                src.expected_response(id)
                    .map_err(|e| lookup_err("expected response", e))?
                    .ok_or_else(|| format!("expected response #{} not found", id))?
                    .text,
            ),
            None => None,
        };

        let judge_prompt = match tc.judge_prompt_id {
            Some(id) => Some(
                src.judge_prompt(id)
                    .map_err(|e| lookup_err("judge prompt", e))?
                    .ok_or_else(|| format!("judge prompt #{} not found", id))?
                    .text,
            ),
            None => None,
        };

        let key = GroupKey::new(tc.strategy_name.trim(), detail.metric_name.as_str());
        let item = ResolvedItem {
            detail_id: detail.id,
            testcase_name: detail.testcase_name.clone(),
            prompt: prompt.user_prompt,
            system_prompt: prompt.system_prompt,
            judge_prompt,
            agent_response: conversation.agent_response,
            expected_response,
            extra_inputs: tc.extra_inputs,
        };
        Ok((key, item))
    }
}
