use async_trait::async_trait;
use regex::Regex;
use scorecard_core::embeddings::util::cosine_similarity;
use scorecard_core::errors::StrategyError;
use scorecard_core::providers::backend::ScoreBackend;
use scorecard_core::registry::StrategyContext;
use scorecard_core::strategy_api::{Strategy, StrategyInput, StrategyScore};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_OOD_THRESHOLD: f64 = 0.75;
const SENTENCE_PATTERN: &str = r"[^.!?]+[.!?]*";

/// Backend handle plus per-call timeout; shared read-only by every worker.
struct Embedder {
    backend: Arc<dyn ScoreBackend>,
    timeout: Duration,
}

impl Embedder {
    fn from_ctx(ctx: &StrategyContext) -> Result<Self, StrategyError> {
        Ok(Self {
            backend: ctx.require_backend()?,
            timeout: ctx.call_timeout()?,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, StrategyError> {
        Ok(self.backend.embed(text, self.timeout).await?)
    }

    async fn similarity(&self, a: &str, b: &str) -> Result<f64, StrategyError> {
        let (va, vb) = tokio::join!(self.embed(a), self.embed(b));
        cosine_similarity(&va?, &vb?)
    }
}

// --- semantic_similarity ---

pub struct SemanticSimilarityStrategy {
    name: String,
    embedder: Embedder,
}

pub fn build_semantic(ctx: &StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> {
    Ok(Arc::new(SemanticSimilarityStrategy {
        name: ctx.name.clone(),
        embedder: Embedder::from_ctx(ctx)?,
    }))
}

#[async_trait]
impl Strategy for SemanticSimilarityStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, input: StrategyInput<'_>) -> Result<StrategyScore, StrategyError> {
        let expected = input.require_expected(&self.name)?;
        let score = self
            .embedder
            .similarity(input.agent_response, expected)
            .await?;
        Ok(StrategyScore::with_details(
            score,
            serde_json::json!({ "model": self.embedder.backend.model_id() }),
        ))
    }
}

// --- out_of_domain ---

/// 1.0 when the response stays close enough to the expected answer (or the
/// optional `alternate_expected` extra input), else 0.0.
pub struct OutOfDomainStrategy {
    name: String,
    embedder: Embedder,
    threshold: f64,
}

pub fn build_out_of_domain(ctx: &StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> {
    let threshold = ctx.params.f64_or("threshold", DEFAULT_OOD_THRESHOLD)?;
    if !(-1.0..=1.0).contains(&threshold) {
        return Err(StrategyError::Config(format!(
            "strategy '{}': threshold must be within [-1, 1], got {}",
            ctx.name, threshold
        )));
    }
    Ok(Arc::new(OutOfDomainStrategy {
        name: ctx.name.clone(),
        embedder: Embedder::from_ctx(ctx)?,
        threshold,
    }))
}

#[async_trait]
impl Strategy for OutOfDomainStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, input: StrategyInput<'_>) -> Result<StrategyScore, StrategyError> {
        let expected = input.require_expected(&self.name)?;
        let response = self.embedder.embed(input.agent_response).await?;
        let mut best = cosine_similarity(&response, &self.embedder.embed(expected).await?)?;

        if let Some(alt) = input.extra("alternate_expected") {
            let alt_sim = cosine_similarity(&response, &self.embedder.embed(alt).await?)?;
            best = best.max(alt_sim);
        }

        let score = if best >= self.threshold { 1.0 } else { 0.0 };
        Ok(StrategyScore::with_details(
            score,
            serde_json::json!({
                "similarity": best,
                "threshold": self.threshold,
            }),
        ))
    }
}

// --- fluency ---

/// Mean cosine similarity of adjacent sentences.
pub struct FluencyStrategy {
    name: String,
    embedder: Embedder,
    sentence_re: Regex,
}

pub fn build_fluency(ctx: &StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> {
    let sentence_re = Regex::new(SENTENCE_PATTERN)
        .map_err(|e| StrategyError::Config(format!("sentence pattern: {}", e)))?;
    Ok(Arc::new(FluencyStrategy {
        name: ctx.name.clone(),
        embedder: Embedder::from_ctx(ctx)?,
        sentence_re,
    }))
}

impl FluencyStrategy {
    pub fn sentences<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.sentence_re
            .find_iter(text)
            .map(|m| m.as_str().trim())
            .filter(|s| s.chars().any(|c| c.is_alphanumeric()))
            .collect()
    }
}

#[async_trait]
impl Strategy for FluencyStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, input: StrategyInput<'_>) -> Result<StrategyScore, StrategyError> {
        let sentences = self.sentences(input.agent_response);
        if sentences.len() < 2 {
            return Ok(StrategyScore::with_details(
                1.0,
                serde_json::json!({ "sentences": sentences.len(), "pairs": 0 }),
            ));
        }

        let mut vectors = Vec::with_capacity(sentences.len());
        for s in &sentences {
            vectors.push(self.embedder.embed(s).await?);
        }
        let mut total = 0.0;
        for pair in vectors.windows(2) {
            total += cosine_similarity(&pair[0], &pair[1])?;
        }
        let pairs = vectors.len() - 1;

        Ok(StrategyScore::with_details(
            total / pairs as f64,
            serde_json::json!({ "sentences": sentences.len(), "pairs": pairs }),
        ))
    }
}
