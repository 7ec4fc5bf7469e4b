use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure of an external scoring capability (embedding, judgment).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout(_))
    }
}

/// Raised by a strategy for a single item. Never folded into a score.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StrategyError {
    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("io error: {0}")]
    Io(String),
}

impl StrategyError {
    pub fn missing_param(strategy: &str, key: &str) -> Self {
        StrategyError::Config(format!(
            "strategy '{}' requires parameter '{}'",
            strategy, key
        ))
    }
}

/// Strategy lookup / construction failure. Fatal to one group only.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown strategy '{name}'{}", suggestion_hint(.suggestion))]
    UnknownStrategy {
        name: String,
        suggestion: Option<String>,
    },

    #[error("failed to construct strategy '{name}': {source}")]
    Construction {
        name: String,
        #[source]
        source: StrategyError,
    },
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

/// Preconditions that abort an analysis before any scoring starts.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run '{run}' is not completed (status: {status})")]
    RunNotCompleted { run: String, status: String },

    #[error("run '{0}' has no run details")]
    NoRunDetails(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// User-facing diagnostic for errors the CLI knows how to explain.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: &'static str,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

pub fn try_map_error(e: &anyhow::Error) -> Option<Diagnostic> {
    if let Some(ae) = e.downcast_ref::<AnalysisError>() {
        let code = match ae {
            AnalysisError::RunNotFound(_) => "E_RUN_NOT_FOUND",
            AnalysisError::RunNotCompleted { .. } => "E_RUN_NOT_COMPLETED",
            AnalysisError::NoRunDetails(_) => "E_RUN_EMPTY",
            AnalysisError::Storage(_) => "E_STORAGE",
        };
        return Some(Diagnostic {
            code,
            message: ae.to_string(),
        });
    }
    if let Some(ce) = e.downcast_ref::<ConfigError>() {
        return Some(Diagnostic {
            code: "E_CONFIG",
            message: ce.0.clone(),
        });
    }
    if let Some(re) = e.downcast_ref::<RegistryError>() {
        return Some(Diagnostic {
            code: "E_STRATEGY",
            message: re.to_string(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_strategy_message_carries_suggestion() {
        let e = RegistryError::UnknownStrategy {
            name: "exact_mach".into(),
            suggestion: Some("exact_match".into()),
        };
        assert_eq!(
            e.to_string(),
            "unknown strategy 'exact_mach' (did you mean 'exact_match'?)"
        );
    }

    #[test]
    fn backend_timeout_is_distinguishable() {
        let e: StrategyError = BackendError::Timeout(Duration::from_secs(3)).into();
        assert!(matches!(e, StrategyError::Backend(ref b) if b.is_timeout()));
    }

    #[test]
    fn analysis_errors_map_to_diagnostics() {
        let e = anyhow::Error::new(AnalysisError::RunNotCompleted {
            run: "nightly".into(),
            status: "RUNNING".into(),
        });
        let diag = try_map_error(&e).expect("mapped");
        assert_eq!(diag.code, "E_RUN_NOT_COMPLETED");
        assert!(diag.message.contains("nightly"));

        let other = anyhow::anyhow!("something else");
        assert!(try_map_error(&other).is_none());
    }
}
