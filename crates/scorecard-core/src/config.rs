use crate::errors::ConfigError;
use crate::strategy_api::{StrategyParams, DEFAULT_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

/// Parameter keys that name files; made absolute against the config's directory.
const PATH_KEYS: &[&str] = &["file_path"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub strategies: BTreeMap<String, serde_json::Value>,
}

fn default_version() -> u32 {
    SUPPORTED_CONFIG_VERSION
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            settings: Settings::default(),
            backend: BackendConfig::default(),
            strategies: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub parallel: Option<usize>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default = "default_true")]
    pub persist_summaries: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallel: None,
            timeout_seconds: None,
            persist_summaries: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendProvider {
    #[default]
    None,
    Fake,
    Openai,
}

impl BackendProvider {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(BackendProvider::None),
            "fake" => Some(BackendProvider::Fake),
            "openai" => Some(BackendProvider::Openai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default)]
    pub provider: BackendProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Cache embeddings in the store.
    #[serde(default = "default_true")]
    pub cache_embeddings: bool,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: BackendProvider::None,
            model: default_model(),
            embedding_model: default_embedding_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            cache_embeddings: true,
        }
    }
}

impl AnalysisConfig {
    pub fn parallel(&self) -> usize {
        self.settings.parallel.unwrap_or(4).max(1)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(
            self.settings
                .timeout_seconds
                .unwrap_or(DEFAULT_TIMEOUT_SECS)
                .max(1),
        )
    }

    pub fn strategy_params(&self, strategy_name: &str) -> StrategyParams {
        self.strategies
            .get(strategy_name)
            .map(StrategyParams::from_value)
            .unwrap_or_default()
    }
}

pub fn load_config(path: &Path, strict: bool) -> Result<AnalysisConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    let mut cfg = parse_config(&raw, strict)
        .map_err(|e| ConfigError(format!("{} (file: {})", e.0, path.display())))?;
    resolve_paths(&mut cfg, path);
    Ok(cfg)
}

pub fn parse_config(raw: &str, strict: bool) -> Result<AnalysisConfig, ConfigError> {
    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let cfg: AnalysisConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    let meaningful_unknowns: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();

    if !meaningful_unknowns.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields detected in strict mode: {:?}",
                meaningful_unknowns
            )));
        }
        tracing::warn!(event = "config_unknown_fields", fields = ?meaningful_unknowns);
    }

    // 0 is the pre-versioned layout; it parses the same.
    if cfg.version != 0 && cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: 0, {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }

    if cfg.settings.parallel == Some(0) {
        return Err(ConfigError("settings.parallel must be at least 1".into()));
    }
    if cfg.settings.timeout_seconds == Some(0) {
        return Err(ConfigError("settings.timeout_seconds must be positive".into()));
    }
    for (name, params) in &cfg.strategies {
        if !params.is_object() && !params.is_null() {
            return Err(ConfigError(format!(
                "strategies.{} must be a mapping of parameters",
                name
            )));
        }
    }

    Ok(cfg)
}

fn resolve_paths(cfg: &mut AnalysisConfig, config_path: &Path) {
    let base = config_path.parent().unwrap_or(Path::new("."));
    for params in cfg.strategies.values_mut() {
        let Some(obj) = params.as_object_mut() else {
            continue;
        };
        for key in PATH_KEYS {
            if let Some(serde_json::Value::String(p)) = obj.get_mut(*key) {
                if Path::new(p.as_str()).is_relative() {
                    *p = base.join(p.as_str()).to_string_lossy().into_owned();
                }
            }
        }
    }
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(
        path,
        r#"version: 1
settings:
  parallel: 4
  timeout_seconds: 30
  persist_summaries: true
backend:
  provider: fake          # none | fake | openai
  model: gpt-4o-mini
  embedding_model: text-embedding-3-small
  api_key_env: OPENAI_API_KEY
strategies:
  truthfulness_external:
    marker: "Answer: "
  out_of_domain:
    threshold: 0.75
  turn_around_time:
    file_path: logs/agent.log
"#,
    )
    .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}
