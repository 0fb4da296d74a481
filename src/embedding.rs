//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait consumed by the indexing pipeline and
//! two concrete providers:
//!
//! - **[`HashEmbedder`]** — deterministic, offline feature-hashing
//!   projection. The default provider: indexing and search work without
//!   any network dependency, and identical texts always embed to the same
//!   unit vector (cosine self-similarity is exactly 1).
//! - **[`OpenAiEmbedder`]** — calls an OpenAI-compatible `/embeddings`
//!   endpoint with batching, per-call timeout, and exponential backoff.
//!
//! # Input preprocessing
//!
//! Both providers preprocess inputs before embedding: empty strings become
//! a single space (some APIs reject empty input), and text is truncated to
//! `4 × token_limit` characters as a conservative token estimate.
//!
//! # Retry strategy
//!
//! Retryable failures — HTTP 429, 5xx, network errors, and messages
//! mentioning rate limits or timeouts — are retried with exponential
//! backoff (1s, 2s, 4s, … capped at 10s), 3 attempts by default. Anything
//! else surfaces immediately with the original error as the cause.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;

/// Maximum backoff between embedding retries.
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Estimated characters per token when truncating input.
const CHARS_PER_TOKEN: usize = 4;

/// A dense embedding with its dimensionality.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dimension: usize,
}

/// Capability set every embedding backend provides.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Provider identifier (e.g. `"hash"`, `"openai"`).
    fn provider(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed a batch, order-preserving: output `i` corresponds to input `i`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Replace empty input with a single space and truncate to the provider's
/// estimated character budget, respecting char boundaries.
pub fn preprocess_input(text: &str, token_limit: usize) -> String {
    if text.is_empty() {
        return " ".to_string();
    }
    let max_chars = token_limit * CHARS_PER_TOKEN;
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// True for failures worth re-driving with backoff.
fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("timeout") || lower.contains("timed out")
}

fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64 << attempt.min(5);
    Duration::from_secs(secs).min(BACKOFF_CAP)
}

/// Instantiate the provider selected by configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dims.unwrap_or(256)))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        other => bail!("unknown embedding provider: '{}' (expected hash or openai)", other),
    }
}

// ============ Hash projection provider ============

/// Deterministic feature-hashing embedder.
///
/// Each token is hashed and scattered into a handful of signed buckets;
/// the accumulated vector is L2-normalized. Purely a function of the
/// input text and dimension, which makes it the reference double for
/// tests and the zero-dependency default for local use.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }

    fn project(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let seed = u64::from_le_bytes(digest[..8].try_into().expect("digest length"));
            for k in 0..3u32 {
                let bits = seed.rotate_left(21 * k);
                let idx = (bits % self.dims as u64) as usize;
                let sign = if bits & (1 << 63) == 0 { 1.0 } else { -1.0 };
                vector[idx] += sign;
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        } else {
            // No tokens at all: a fixed unit vector keeps the contract.
            vector[0] = 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dims
    }

    fn provider(&self) -> &str {
        "hash"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let input = preprocess_input(text, usize::MAX / CHARS_PER_TOKEN);
        Ok(Embedding {
            vector: self.project(&input),
            dimension: self.dims,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

// ============ OpenAI-compatible provider ============

/// Embedding provider for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    dims: usize,
    token_limit: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .context("embedding.model is required for the openai provider")?;
        let dims = config
            .dims
            .context("embedding.dims is required for the openai provider")?;
        let api_key = config
            .api_key
            .clone()
            .context("embedding.api_key is required for the openai provider")?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            dims,
            token_limit: config.token_limit,
            max_retries: config.max_retries,
        })
    }

    async fn request_batch(&self, inputs: &[String]) -> Result<Vec<Embedding>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });

        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            let response = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .context("failed to decode embeddings response")?;
                        return self.parse_response(&json, inputs.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429
                        || status.is_server_error()
                        || is_retryable_message(&body_text)
                    {
                        last_err =
                            Some(anyhow::anyhow!("embeddings API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("embeddings API error {}: {}", status, body_text);
                }
                Err(err) => {
                    // Network-level failures are always retryable.
                    last_err = Some(anyhow::Error::new(err).context("embeddings request failed"));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }

    fn parse_response(&self, json: &serde_json::Value, expected: usize) -> Result<Vec<Embedding>> {
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .context("invalid embeddings response: missing data array")?;
        if data.len() != expected {
            bail!(
                "invalid embeddings response: expected {} vectors, got {}",
                expected,
                data.len()
            );
        }

        // Order by the response's index field so output matches input order.
        let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for (pos, item) in data.iter().enumerate() {
            let index = item
                .get("index")
                .and_then(|i| i.as_u64())
                .map(|i| i as usize)
                .unwrap_or(pos);
            let vector: Vec<f32> = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .context("invalid embeddings response: missing embedding")?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            indexed.push((index, vector));
        }
        indexed.sort_by_key(|(i, _)| *i);

        Ok(indexed
            .into_iter()
            .map(|(_, vector)| Embedding {
                dimension: vector.len(),
                vector,
            })
            .collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimension(&self) -> usize {
        self.dims
    }

    fn provider(&self) -> &str {
        "openai"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .context("empty embedding response")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let inputs: Vec<String> = texts
            .iter()
            .map(|t| preprocess_input(t, self.token_limit))
            .collect();
        self.request_batch(&inputs).await
    }
}

/// Cosine similarity between two dense vectors. Returns 0 for mismatched
/// lengths or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
