use super::{ensure_parent_dir, exit_codes};
use crate::cli::args::ImportArgs;
use anyhow::{Context, Result};
use scorecard_core::storage::import::Corpus;
use scorecard_core::storage::Store;

pub fn cmd_import(args: ImportArgs) -> Result<i32> {
    let corpus = Corpus::load(&args.corpus)?;

    ensure_parent_dir(&args.db)?;
    let store = Store::open(&args.db)?;
    store.init_schema()?;

    let stats = store
        .import_corpus(&corpus)
        .with_context(|| format!("failed to import {}", args.corpus.display()))?;

    tracing::info!(
        event = "corpus_imported",
        corpus = %args.corpus.display(),
        testcases = stats.testcases,
        runs = stats.runs,
        run_details = stats.run_details
    );
    eprintln!(
        "✅ imported {} testcases, {} runs ({} run details) into {}",
        stats.testcases,
        stats.runs,
        stats.run_details,
        args.db.display()
    );
    Ok(exit_codes::OK)
}
