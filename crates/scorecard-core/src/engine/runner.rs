use super::evaluator::{collect, BatchEvaluator, CancelToken};
use super::grouper::RunDetailGrouper;
use crate::aggregate::aggregate;
use crate::errors::AnalysisError;
use crate::model::{MetricSummary, Run, RunRef, ScoreResult, SkipNote};
use crate::storage::RecordSource;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A group that produced no results because its strategy could not be built.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupFailure {
    pub group: String,
    pub items: usize,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub run: Run,
    pub summaries: BTreeMap<String, MetricSummary>,
    pub results: Vec<ScoreResult>,
    pub skipped: Vec<SkipNote>,
    pub group_failures: Vec<GroupFailure>,
    pub cancelled: bool,
    pub undispatched: usize,
}

impl AnalysisReport {
    pub fn failed_items(&self) -> impl Iterator<Item = &ScoreResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn has_failures(&self) -> bool {
        self.failed_items().next().is_some() || !self.group_failures.is_empty()
    }
}

pub struct Analyzer {
    pub source: Arc<dyn RecordSource>,
    pub evaluator: BatchEvaluator,
    pub persist_summaries: bool,
}

impl Analyzer {
    pub fn new(source: Arc<dyn RecordSource>, evaluator: BatchEvaluator) -> Self {
        let persist_summaries = evaluator.config().settings.persist_summaries;
        Self {
            source,
            evaluator,
            persist_summaries,
        }
    }

    pub fn find_run(&self, run_ref: &RunRef) -> Result<Run, AnalysisError> {
        let run = match run_ref {
            RunRef::Id(id) => self.source.run_by_id(*id)?,
            RunRef::Name(name) => self.source.run_by_name(name)?,
        };
        run.ok_or_else(|| AnalysisError::RunNotFound(run_ref.to_string()))
    }

    /// Group, score and aggregate one completed run.
    ///
    /// Only run-level preconditions (missing run, unfinished run, no
    /// details) and storage failures are returned as errors; everything
    /// below that ends up inside the report.
    pub async fn analyze(
        &self,
        run_ref: &RunRef,
        cancel: &CancelToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        let run = self.find_run(run_ref)?;
        let grouping = RunDetailGrouper::new(self.source.clone()).group(&run)?;

        tracing::info!(
            event = "analysis_started",
            run = %run.name,
            groups = grouping.groups.len(),
            items = grouping.item_count(),
            skipped = grouping.skipped.len(),
        );

        let mut pending = Vec::with_capacity(grouping.item_count());
        let mut group_failures = Vec::new();
        let mut undispatched = 0usize;

        for group in grouping.groups {
            if cancel.is_cancelled() {
                undispatched += group.items.len();
                continue;
            }
            let strategy = match self.evaluator.strategy_for(&group.key) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(
                        event = "group_failed",
                        run = %run.name,
                        group = %group.key,
                        items = group.items.len(),
                        error = %e,
                    );
                    group_failures.push(GroupFailure {
                        group: group.key.to_string(),
                        items: group.items.len(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            undispatched += self
                .evaluator
                .dispatch(&group.key, strategy, group.items, cancel, &mut pending)
                .await;
        }

        let results = collect(pending).await;
        let summaries = aggregate(&results);
        let cancelled = cancel.is_cancelled();

        // A cancelled analysis is partial; don't record it as the run's score.
        if self.persist_summaries && !cancelled && !summaries.is_empty() {
            let rows: Vec<MetricSummary> = summaries.values().cloned().collect();
            self.source.append_summaries(run.id, &rows)?;
        }

        tracing::info!(
            event = "analysis_finished",
            run = %run.name,
            results = results.len(),
            failed = results.iter().filter(|r| !r.is_success()).count(),
            group_failures = group_failures.len(),
            cancelled,
            undispatched,
        );

        Ok(AnalysisReport {
            run,
            summaries,
            results,
            skipped: grouping.skipped,
            group_failures,
            cancelled,
            undispatched,
        })
    }
}
