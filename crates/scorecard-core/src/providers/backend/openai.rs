use super::{with_deadline, ScoreBackend};
use crate::errors::BackendError;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio::sync::OnceCell;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible HTTP backend (`/embeddings`, `/chat/completions`).
pub struct OpenAiBackend {
    pub model: String,
    pub embedding_model: String,
    pub base_url: String,
    api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    client: OnceCell<reqwest::Client>,
}

impl OpenAiBackend {
    pub fn new(model: String, embedding_model: String, api_key: String) -> Self {
        Self {
            model,
            embedding_model,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            temperature: 0.0,
            max_tokens: 512,
            client: OnceCell::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    // Built on first use and shared by every later call.
    async fn client(&self) -> Result<&reqwest::Client, BackendError> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .build()
                    .map_err(|e| BackendError::Unavailable(format!("http client: {}", e)))
            })
            .await
    }

    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, BackendError> {
        let client = self.client().await?;
        let url = format!("{}{}", self.base_url, path);

        let resp = client
            .post(&url)
            .timeout(timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Request(format!(
                "{} returned {}: {}",
                path, status, error_text
            )));
        }

        resp.json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(timeout)
    } else if e.is_connect() {
        BackendError::Unavailable(e.to_string())
    } else {
        BackendError::Request(e.to_string())
    }
}

#[async_trait]
impl ScoreBackend for OpenAiBackend {
    async fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>, BackendError> {
        let body = json!({
            "model": self.embedding_model,
            "input": text,
        });
        let json = with_deadline(timeout, self.post_json("/embeddings", body, timeout)).await?;

        let arr = json
            .pointer("/data/0/embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                BackendError::InvalidResponse("embeddings response missing data[0]".into())
            })?;

        arr.iter()
            .map(|x| {
                x.as_f64().map(|f| f as f32).ok_or_else(|| {
                    BackendError::InvalidResponse("embedding contains non-numeric value".into())
                })
            })
            .collect()
    }

    async fn judge(&self, rubric_prompt: &str, timeout: Duration) -> Result<String, BackendError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": rubric_prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let json =
            with_deadline(timeout, self.post_json("/chat/completions", body, timeout)).await?;

        json.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| BackendError::InvalidResponse("chat response missing content".into()))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model_id(&self) -> String {
        format!("{}+{}", self.model, self.embedding_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let b = OpenAiBackend::new("m".into(), "e".into(), "k".into())
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(b.base_url, "http://localhost:8080/v1");
        assert_eq!(b.model_id(), "m+e");
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error_not_a_panic() {
        let b = OpenAiBackend::new("m".into(), "e".into(), "k".into())
            .with_base_url("http://127.0.0.1:9");
        let err = b.embed("hi", Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Unavailable(_) | BackendError::Request(_) | BackendError::Timeout(_)
        ));
    }
}
