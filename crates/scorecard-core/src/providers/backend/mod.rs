use crate::config::{BackendConfig, BackendProvider};
use crate::errors::{BackendError, ConfigError};
use crate::storage::Store;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// External model capability some strategies depend on.
///
/// Every call carries its own timeout. Implementations must be safe to call
/// concurrently; a backend that cannot be must serialize internally.
#[async_trait]
pub trait ScoreBackend: Send + Sync {
    async fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>, BackendError>;

    /// Send a rubric prompt and return the judge's raw reply text.
    async fn judge(&self, rubric_prompt: &str, timeout: Duration) -> Result<String, BackendError>;

    fn provider_name(&self) -> &'static str;

    fn model_id(&self) -> String;
}

/// Bound `fut` by `timeout`, mapping expiry to `BackendError::Timeout`.
pub async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(BackendError::Timeout(timeout)),
    }
}

/// Builds the configured backend, if any. With a store, embeddings are
/// cached in it.
pub fn build_backend(
    cfg: &BackendConfig,
    store: Option<&Store>,
) -> Result<Option<Arc<dyn ScoreBackend>>, ConfigError> {
    let inner: Arc<dyn ScoreBackend> = match cfg.provider {
        BackendProvider::None => return Ok(None),
        BackendProvider::Fake => Arc::new(fake::FakeBackend::new()),
        BackendProvider::Openai => {
            let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
                ConfigError(format!(
                    "backend 'openai' needs an API key in ${}",
                    cfg.api_key_env
                ))
            })?;
            let mut b = openai::OpenAiBackend::new(
                cfg.model.clone(),
                cfg.embedding_model.clone(),
                api_key,
            );
            if let Some(url) = &cfg.base_url {
                b = b.with_base_url(url.as_str());
            }
            Arc::new(b)
        }
    };

    match store {
        Some(s) if cfg.cache_embeddings => {
            Ok(Some(Arc::new(cached::CachedBackend::new(inner, s.clone()))))
        }
        _ => Ok(Some(inner)),
    }
}

pub mod cached;
pub mod fake;
pub mod openai;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_maps_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, BackendError>(1)
        };
        let err = with_deadline(Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Timeout(Duration::from_millis(10)));
    }

    #[test]
    fn build_backend_follows_provider() {
        let mut cfg = BackendConfig::default();
        assert!(build_backend(&cfg, None).unwrap().is_none());

        cfg.provider = BackendProvider::Fake;
        let b = build_backend(&cfg, None).unwrap().unwrap();
        assert_eq!(b.provider_name(), "fake");

        cfg.provider = BackendProvider::Openai;
        cfg.api_key_env = "SCORECARD_TEST_KEY_THAT_IS_NEVER_SET".into();
        let err = build_backend(&cfg, None).err().unwrap();
        assert!(err.0.contains("SCORECARD_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[tokio::test]
    async fn deadline_passes_through_results() {
        let fast = async { Ok::<_, BackendError>(7) };
        assert_eq!(with_deadline(Duration::from_secs(1), fast).await, Ok(7));
    }
}
