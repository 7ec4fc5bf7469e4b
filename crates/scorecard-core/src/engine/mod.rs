pub mod evaluator;
pub mod grouper;
pub mod runner;

pub use evaluator::{BatchEvaluator, CancelToken};
pub use grouper::{Group, Grouping, RunDetailGrouper};
pub use runner::{AnalysisReport, Analyzer, GroupFailure};
