use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "scorecard",
    version,
    about = "Score recorded agent runs against their test cases"
)]
pub struct Cli {
    /// tracing filter, e.g. `info` or `scorecard_core=debug`
    #[arg(long, global = true, env = "SCORECARD_LOG", default_value = "warn")]
    pub log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Score one completed run and print per-metric summaries
    Analyze(AnalyzeArgs),
    /// Load a corpus document (YAML or JSON) into the database
    Import(ImportArgs),
    /// List the registered strategy names
    Strategies,
    /// Write a sample config
    Init(InitArgs),
    Version,
}

#[derive(clap::Args, Clone, Debug)]
pub struct AnalyzeArgs {
    #[arg(long, default_value = ".scorecard/scorecard.db")]
    pub db: PathBuf,

    /// Without a config file the built-in defaults apply.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, conflicts_with = "run_id", required_unless_present = "run_id")]
    pub run: Option<String>,

    #[arg(long)]
    pub run_id: Option<i64>,

    /// Also write the full report as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Override `backend.provider` (none|fake|openai)
    #[arg(long)]
    pub backend: Option<String>,

    /// Do not append metric summaries to the database
    #[arg(long)]
    pub no_persist: bool,

    /// Reject unknown config keys; exit 1 when any item or group failed
    #[arg(long)]
    pub strict: bool,

    /// Ignore cached embeddings (fresh vectors are still written)
    #[arg(long)]
    pub refresh_embeddings: bool,

    /// List skipped run details in the console summary
    #[arg(long)]
    pub show_skipped: bool,
}

#[derive(clap::Args, Clone, Debug)]
pub struct ImportArgs {
    #[arg(long, default_value = ".scorecard/scorecard.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub corpus: PathBuf,
}

#[derive(clap::Args, Clone, Debug)]
pub struct InitArgs {
    #[arg(long, default_value = "scorecard.yaml")]
    pub config: PathBuf,
}
