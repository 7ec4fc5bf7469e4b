use super::{with_deadline, ScoreBackend};
use crate::errors::BackendError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const FAKE_DIMS: usize = 64;

/// Deterministic offline backend.
///
/// Embeddings are hashed bag-of-words vectors (plus a constant bias
/// component so empty text still has a direction); judge replies are
/// scripted. Used by tests and `--backend fake` runs.
pub struct FakeBackend {
    judge_replies: Mutex<Vec<String>>,
    default_reply: String,
    fixed_embeddings: HashMap<String, Vec<f32>>,
    delay: Option<Duration>,
    failure: Option<BackendError>,
    pub embed_calls: AtomicUsize,
    pub judge_calls: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            judge_replies: Mutex::new(Vec::new()),
            default_reply: "Score: 10".to_string(),
            fixed_embeddings: HashMap::new(),
            delay: None,
            failure: None,
            embed_calls: AtomicUsize::new(0),
            judge_calls: AtomicUsize::new(0),
        }
    }

    /// Replies are handed out in order; once exhausted the default is used.
    pub fn with_judge_replies(self, replies: Vec<String>) -> Self {
        *self.judge_replies.lock().unwrap() = replies.into_iter().rev().collect();
        self
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    pub fn with_embedding(mut self, text: impl Into<String>, vec: Vec<f32>) -> Self {
        self.fixed_embeddings.insert(text.into(), vec);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, err: BackendError) -> Self {
        self.failure = Some(err);
        self
    }

    async fn simulate(&self) -> Result<(), BackendError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

pub fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; FAKE_DIMS];
    v[0] = 0.5;
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let idx = 1 + (fnv1a(&token.to_lowercase()) as usize % (FAKE_DIMS - 1));
        v[idx] += 1.0;
    }
    v
}

fn fnv1a(s: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

#[async_trait]
impl ScoreBackend for FakeBackend {
    async fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>, BackendError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        with_deadline(timeout, self.simulate()).await?;
        Ok(self
            .fixed_embeddings
            .get(text)
            .cloned()
            .unwrap_or_else(|| hashed_embedding(text)))
    }

    async fn judge(&self, _rubric_prompt: &str, timeout: Duration) -> Result<String, BackendError> {
        self.judge_calls.fetch_add(1, Ordering::SeqCst);
        with_deadline(timeout, self.simulate()).await?;
        let next = self.judge_replies.lock().unwrap().pop();
        Ok(next.unwrap_or_else(|| self.default_reply.clone()))
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn model_id(&self) -> String {
        format!("fake-bow-{}", FAKE_DIMS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::util::cosine_similarity;

    #[tokio::test]
    async fn identical_text_embeds_identically() -> anyhow::Result<()> {
        let b = FakeBackend::new();
        let t = Duration::from_secs(1);
        let a = b.embed("The cat sat.", t).await?;
        let c = b.embed("the CAT sat", t).await?;
        assert!((cosine_similarity(&a, &c)? - 1.0).abs() < 1e-9);
        assert_eq!(b.embed_calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn judge_replies_in_order_then_default() -> anyhow::Result<()> {
        let b = FakeBackend::new()
            .with_judge_replies(vec!["Score: 3".into(), "Score: 4".into()])
            .with_default_reply("Score: 9");
        let t = Duration::from_secs(1);
        assert_eq!(b.judge("p", t).await?, "Score: 3");
        assert_eq!(b.judge("p", t).await?, "Score: 4");
        assert_eq!(b.judge("p", t).await?, "Score: 9");
        Ok(())
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let b = FakeBackend::new().with_delay(Duration::from_millis(200));
        let err = b.embed("x", Duration::from_millis(10)).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
