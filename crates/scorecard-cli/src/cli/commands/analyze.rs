use super::{ensure_parent_dir, exit_codes};
use crate::cli::args::AnalyzeArgs;
use anyhow::Result;
use scorecard_core::config::{load_config, AnalysisConfig, BackendProvider};
use scorecard_core::engine::{AnalysisReport, Analyzer, BatchEvaluator, CancelToken};
use scorecard_core::errors::{try_map_error, ConfigError};
use scorecard_core::model::RunRef;
use scorecard_core::providers::backend::cached::CachedBackend;
use scorecard_core::providers::backend::{build_backend, ScoreBackend};
use scorecard_core::storage::Store;
use std::sync::Arc;

pub async fn cmd_analyze(args: AnalyzeArgs) -> Result<i32> {
    let cfg = match resolve_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    ensure_parent_dir(&args.db)?;
    let store = Store::open(&args.db)?;
    store.init_schema()?;

    let backend = match open_backend(&cfg, &store, args.refresh_embeddings) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let registry = Arc::new(scorecard_metrics::default_registry());
    let evaluator = BatchEvaluator::new(registry, Arc::new(cfg), backend);
    let analyzer = Analyzer::new(Arc::new(store.clone()), evaluator);

    let run_ref = match (&args.run, args.run_id) {
        (_, Some(id)) => RunRef::Id(id),
        (Some(name), None) => RunRef::Name(name.clone()),
        (None, None) => {
            eprintln!("config error: either --run or --run-id is required");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let cancel = CancelToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!(event = "cancel_requested");
                cancel.cancel();
            }
        })
    };

    let outcome = analyzer.analyze(&run_ref, &cancel).await;
    watcher.abort();

    let report = match outcome {
        Ok(r) => r,
        Err(e) => {
            let e = anyhow::Error::new(e);
            if let Some(diag) = try_map_error(&e) {
                eprintln!("{}", diag);
                return Ok(exit_codes::CONFIG_ERROR);
            }
            return Err(e);
        }
    };

    if let Some(path) = &args.json {
        scorecard_core::report::json::write_json(&report, path)?;
    }
    scorecard_core::report::console::print_summary(&report, args.show_skipped);

    let stats = store.stats_best_effort();
    tracing::debug!(
        event = "store_stats",
        runs = ?stats.runs,
        run_details = ?stats.run_details,
        summaries = ?stats.summaries
    );

    Ok(decide_exit_code(&report, args.strict))
}

fn resolve_config(args: &AnalyzeArgs) -> Result<AnalysisConfig, ConfigError> {
    let mut cfg = match &args.config {
        Some(path) => load_config(path, args.strict)?,
        None => AnalysisConfig::default(),
    };
    if let Some(p) = &args.backend {
        cfg.backend.provider = BackendProvider::parse(p).ok_or_else(|| {
            ConfigError(format!(
                "unknown backend '{}' (expected none, fake or openai)",
                p
            ))
        })?;
    }
    if args.no_persist {
        cfg.settings.persist_summaries = false;
    }
    Ok(cfg)
}

fn open_backend(
    cfg: &AnalysisConfig,
    store: &Store,
    refresh: bool,
) -> Result<Option<Arc<dyn ScoreBackend>>, ConfigError> {
    if !refresh || !cfg.backend.cache_embeddings {
        return build_backend(&cfg.backend, Some(store));
    }
    let inner = build_backend(&cfg.backend, None)?;
    Ok(inner.map(|b| {
        Arc::new(CachedBackend::new(b, store.clone()).refreshing(true)) as Arc<dyn ScoreBackend>
    }))
}

/// A cancelled analysis is incomplete and always fails; item and group
/// failures only fail under `--strict`.
fn decide_exit_code(report: &AnalysisReport, strict: bool) -> i32 {
    if report.cancelled {
        return exit_codes::TEST_FAILED;
    }
    if strict && report.has_failures() {
        return exit_codes::TEST_FAILED;
    }
    exit_codes::OK
}
