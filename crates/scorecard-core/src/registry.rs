use crate::errors::{RegistryError, StrategyError};
use crate::providers::backend::ScoreBackend;
use crate::strategy_api::{Strategy, StrategyParams};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// What a factory gets to build a strategy from.
#[derive(Clone)]
pub struct StrategyContext {
    /// The name the strategy was resolved under (aliases keep their own).
    pub name: String,
    pub params: StrategyParams,
    pub backend: Option<Arc<dyn ScoreBackend>>,
    /// Per backend call.
    pub timeout: Duration,
}

impl StrategyContext {
    pub fn new(name: impl Into<String>, params: StrategyParams) -> Self {
        Self {
            name: name.into(),
            params,
            backend: None,
            timeout: Duration::from_secs(crate::strategy_api::DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ScoreBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn require_backend(&self) -> Result<Arc<dyn ScoreBackend>, StrategyError> {
        self.backend.clone().ok_or_else(|| {
            StrategyError::Config(format!(
                "strategy '{}' needs a scoring backend (backend.provider is 'none')",
                self.name
            ))
        })
    }

    /// `timeout_seconds` in the strategy params wins over the global setting.
    pub fn call_timeout(&self) -> Result<Duration, StrategyError> {
        if self.params.get("timeout_seconds").is_some() {
            self.params.timeout()
        } else {
            Ok(self.timeout)
        }
    }
}

pub type StrategyFactory =
    Arc<dyn Fn(&StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> + Send + Sync>;

/// Name -> constructor table. Populated once at startup, then read-only.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations under the same name replace earlier ones.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(|k| k.as_str()).collect()
    }

    pub fn resolve(
        &self,
        name: &str,
        ctx: &StrategyContext,
    ) -> Result<Arc<dyn Strategy>, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownStrategy {
                name: name.to_string(),
                suggestion: self.suggest(name),
            })?;

        factory(ctx).map_err(|source| RegistryError::Construction {
            name: name.to_string(),
            source,
        })
    }

    fn suggest(&self, name: &str) -> Option<String> {
        self.factories
            .keys()
            .map(|k| (strsim::levenshtein(name, k), k))
            .filter(|(d, _)| *d <= 3)
            .min_by_key(|(d, _)| *d)
            .map(|(_, k)| k.clone())
    }
}
