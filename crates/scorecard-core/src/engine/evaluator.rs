use crate::config::AnalysisConfig;
use crate::errors::RegistryError;
use crate::model::{GroupKey, ResolvedItem, ScoreResult};
use crate::providers::backend::ScoreBackend;
use crate::registry::{StrategyContext, StrategyRegistry};
use crate::strategy_api::{Strategy, StrategyInput};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Run-level abort switch. Stops dispatch; in-flight items finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A dispatched item. Joined in dispatch order.
pub struct Pending {
    key: GroupKey,
    testcase_name: String,
    handle: JoinHandle<ScoreResult>,
}

/// Scores groups on a bounded worker pool shared by every group.
pub struct BatchEvaluator {
    registry: Arc<StrategyRegistry>,
    config: Arc<AnalysisConfig>,
    backend: Option<Arc<dyn ScoreBackend>>,
    sem: Arc<Semaphore>,
}

impl BatchEvaluator {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        config: Arc<AnalysisConfig>,
        backend: Option<Arc<dyn ScoreBackend>>,
    ) -> Self {
        let sem = Arc::new(Semaphore::new(config.parallel()));
        Self {
            registry,
            config,
            backend,
            sem,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Construction happens once per group, before any item runs.
    pub fn strategy_for(&self, key: &GroupKey) -> Result<Arc<dyn Strategy>, RegistryError> {
        let mut ctx = StrategyContext::new(
            key.strategy_name.as_str(),
            self.config.strategy_params(&key.strategy_name),
        )
        .with_timeout(self.config.call_timeout());
        if let Some(b) = &self.backend {
            ctx = ctx.with_backend(b.clone());
        }
        self.registry.resolve(&key.strategy_name, &ctx)
    }

    /// Score one group; an item's failure is recorded, never propagated.
    pub async fn run(
        &self,
        key: &GroupKey,
        items: Vec<ResolvedItem>,
    ) -> Result<Vec<ScoreResult>, RegistryError> {
        let strategy = self.strategy_for(key)?;
        let mut pending = Vec::with_capacity(items.len());
        self.dispatch(key, strategy, items, &CancelToken::new(), &mut pending)
            .await;
        Ok(collect(pending).await)
    }

    /// Spawns items as pool permits free up. Returns how many items were
    /// left undispatched because `cancel` fired.
    pub async fn dispatch(
        &self,
        key: &GroupKey,
        strategy: Arc<dyn Strategy>,
        items: Vec<ResolvedItem>,
        cancel: &CancelToken,
        out: &mut Vec<Pending>,
    ) -> usize {
        let total = items.len();
        for (i, item) in items.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return total - i;
            }
            let permit = match self.sem.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return total - i,
            };
            // Cancellation may have fired while waiting for a slot.
            if cancel.is_cancelled() {
                return total - i;
            }

            let testcase_name = item.testcase_name.clone();
            let strategy = strategy.clone();
            let task_key = key.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                evaluate_item(strategy.as_ref(), &task_key, &item).await
            });
            out.push(Pending {
                key: key.clone(),
                testcase_name,
                handle,
            });
        }
        0
    }
}

/// Join barrier. A panicked task becomes a failed result for its item.
pub async fn collect(pending: Vec<Pending>) -> Vec<ScoreResult> {
    let mut results = Vec::with_capacity(pending.len());
    for p in pending {
        let r = match p.handle.await {
            Ok(r) => r,
            Err(e) => {
                let msg = format!("join error: {}", e);
                tracing::warn!(
                    event = "item_failed",
                    group = %p.key,
                    testcase = %p.testcase_name,
                    error = %msg,
                );
                ScoreResult::failed(&p.key, &p.testcase_name, msg)
            }
        };
        results.push(r);
    }
    results
}

pub async fn evaluate_item(
    strategy: &dyn Strategy,
    key: &GroupKey,
    item: &ResolvedItem,
) -> ScoreResult {
    let started = std::time::Instant::now();
    let outcome = strategy.evaluate(StrategyInput::from_item(item)).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(s) if s.score.is_finite() => {
            tracing::info!(
                event = "item_scored",
                group = %key,
                testcase = %item.testcase_name,
                metric = %key.metric_name,
                strategy = %key.strategy_name,
                score = s.score,
                duration_ms,
            );
            ScoreResult::scored(key, &item.testcase_name, s.score).with_details(s.details)
        }
        Ok(s) => {
            let msg = format!("strategy returned a non-finite score ({})", s.score);
            log_failure(key, item, &msg, duration_ms);
            ScoreResult::failed(key, &item.testcase_name, msg)
        }
        Err(e) => {
            let msg = e.to_string();
            log_failure(key, item, &msg, duration_ms);
            ScoreResult::failed(key, &item.testcase_name, msg)
        }
    }
}

fn log_failure(key: &GroupKey, item: &ResolvedItem, msg: &str, duration_ms: u64) {
    tracing::warn!(
        event = "item_failed",
        group = %key,
        testcase = %item.testcase_name,
        metric = %key.metric_name,
        strategy = %key.strategy_name,
        error = %msg,
        duration_ms,
    );
}
