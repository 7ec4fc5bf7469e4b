use super::ScoreBackend;
use crate::embeddings::util::embed_cache_key;
use crate::errors::BackendError;
use crate::storage::Store;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Embedding cache in front of another backend. Judge calls pass through.
pub struct CachedBackend {
    inner: Arc<dyn ScoreBackend>,
    store: Store,
    refresh: bool,
}

impl CachedBackend {
    pub fn new(inner: Arc<dyn ScoreBackend>, store: Store) -> Self {
        Self {
            inner,
            store,
            refresh: false,
        }
    }

    /// Ignore cached vectors but still write fresh ones.
    pub fn refreshing(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}

#[async_trait]
impl ScoreBackend for CachedBackend {
    async fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>, BackendError> {
        let model_id = self.inner.model_id();
        let key = embed_cache_key(&model_id, text);

        if !self.refresh {
            match self.store.get_embedding(&key) {
                Ok(Some((_m, vec))) => return Ok(vec),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(event = "embedding_cache_read_failed", error = %e);
                }
            }
        }

        let vec = self.inner.embed(text, timeout).await?;
        if let Err(e) = self.store.put_embedding(&key, &model_id, &vec) {
            tracing::warn!(event = "embedding_cache_write_failed", error = %e);
        }
        Ok(vec)
    }

    async fn judge(&self, rubric_prompt: &str, timeout: Duration) -> Result<String, BackendError> {
        self.inner.judge(rubric_prompt, timeout).await
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    fn model_id(&self) -> String {
        self.inner.model_id()
    }
}
