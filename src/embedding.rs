//! Embedding backends and the batching gateway.
//!
//! The [`EmbeddingBackend`] trait abstracts the provider; the
//! [`EmbeddingGateway`] wraps a backend with batching, per-call
//! timeouts, and bounded jittered retry, and carries the model version
//! tag that queries and chunks must share.
//!
//! Implementations:
//! - **[`HttpEmbeddingBackend`]** — OpenAI-style `POST /v1/embeddings`
//!   endpoint. Requires the `OPENAI_API_KEY` environment variable.
//! - **[`DisabledBackend`]** — always fails; used when embeddings are
//!   not configured.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//!
//! Also provides pure vector utilities: [`cosine_similarity`],
//! [`vec_to_blob`], and [`blob_to_vec`] (little-endian f32 BLOB codec
//! for SQLite persistence).

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::retry::{with_retries, BackendError, RetryPolicy};

/// Trait for embedding providers.
///
/// One vector per input text, same order, fixed dimensionality.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one batch of texts. A single provider call, no retry.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, BackendError>;
}

/// A no-op backend that always returns errors.
pub struct DisabledBackend;

#[async_trait]
impl EmbeddingBackend for DisabledBackend {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, BackendError> {
        Err(BackendError::terminal("embedding provider is disabled"))
    }
}

/// Embedding backend calling an OpenAI-style embeddings API.
pub struct HttpEmbeddingBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl HttpEmbeddingBackend {
    /// Create a backend from configuration.
    ///
    /// Fails when `model` or `dims` is not set, or when
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Config("embedding.model required for openai provider".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| Error::Config("embedding.dims required for openai provider".into()))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::retryable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let json: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| BackendError::retryable(e.to_string()))?;
            return parse_embeddings_response(&json);
        }

        let body_text = resp.text().await.unwrap_or_default();
        let message = format!("embeddings API error {}: {}", status, body_text);
        if status.as_u16() == 429 || status.is_server_error() {
            Err(BackendError::retryable(message))
        } else {
            Err(BackendError::terminal(message))
        }
    }
}

/// Extract `data[].embedding` arrays in input order.
fn parse_embeddings_response(
    json: &serde_json::Value,
) -> std::result::Result<Vec<Vec<f32>>, BackendError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| BackendError::terminal("invalid response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| BackendError::terminal("invalid response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

/// Create the backend named by the configuration.
pub fn create_backend(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledBackend)),
        "openai" => Ok(Box::new(HttpEmbeddingBackend::new(config)?)),
        other => Err(Error::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Batching, retrying front door for a single [`EmbeddingBackend`].
///
/// Queries and chunks are embedded through the same gateway instance,
/// which guarantees they share one model/version tag.
pub struct EmbeddingGateway {
    backend: Box<dyn EmbeddingBackend>,
    batch_size: usize,
    policy: RetryPolicy,
}

impl std::fmt::Debug for EmbeddingGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGateway")
            .field("model", &self.backend.model_name())
            .field("batch_size", &self.batch_size)
            .field("policy", &self.policy)
            .finish()
    }
}

impl EmbeddingGateway {
    /// Wrap a backend with the config's batch size and retry policy.
    ///
    /// Fails at startup when the configuration names a different model
    /// than the backend reports, so a chunk/query model mismatch can
    /// never reach query time.
    pub fn new(backend: Box<dyn EmbeddingBackend>, config: &EmbeddingConfig) -> Result<Self> {
        if let Some(expected) = &config.model {
            if backend.model_name() != "disabled" && backend.model_name() != expected {
                return Err(Error::Config(format!(
                    "embedding model mismatch: configured '{}', backend reports '{}'",
                    expected,
                    backend.model_name()
                )));
            }
        }
        if config.batch_size == 0 {
            return Err(Error::Config("embedding.batch_size must be > 0".into()));
        }
        Ok(Self {
            backend,
            batch_size: config.batch_size,
            policy: RetryPolicy::new(config.max_retries, config.timeout_secs),
        })
    }

    /// Model version tag recorded on every indexed chunk.
    pub fn model_tag(&self) -> &str {
        self.backend.model_name()
    }

    pub fn dims(&self) -> usize {
        self.backend.dims()
    }

    /// Embed texts in the fewest provider calls the batch size permits.
    ///
    /// Each batch is retried independently; the result carries one
    /// entry per batch so partial success is explicit — a terminal
    /// failure in one batch leaves the others unaffected.
    pub async fn embed_batches(&self, texts: &[String]) -> Vec<Result<Vec<Vec<f32>>>> {
        let mut results = Vec::new();
        for batch in texts.chunks(self.batch_size) {
            results.push(self.embed_one_batch(batch).await);
        }
        results
    }

    /// Embed all texts, failing on the first terminally failed batch.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for result in self.embed_batches(texts).await {
            vectors.extend(result?);
        }
        Ok(vectors)
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_one_batch(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingBackend("empty embedding response".into()))
    }

    async fn embed_one_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = with_retries(self.policy, "embedding", || self.backend.embed(batch))
            .await
            .map_err(|e| Error::EmbeddingBackend(e.message))?;

        if vectors.len() != batch.len() {
            return Err(Error::EmbeddingBackend(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            )));
        }
        let dims = self.backend.dims();
        if dims > 0 {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(Error::EmbeddingBackend(format!(
                    "provider returned a {}-dim vector, expected {}",
                    bad.len(),
                    dims
                )));
            }
        }
        Ok(vectors)
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or
/// vectors of different lengths.
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend that fails a configurable number of times before
    /// returning constant unit vectors.
    struct FlakyBackend {
        failures: AtomicU32,
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingBackend for FlakyBackend {
        fn model_name(&self) -> &str {
            "test-embed-1"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, BackendError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(BackendError::retryable("simulated 503"));
            }
            Ok(texts.iter().map(|_| vec![1.0; self.dims]).collect())
        }
    }

    fn config(batch_size: usize, max_retries: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("test-embed-1".to_string()),
            dims: Some(4),
            batch_size,
            max_retries,
            timeout_secs: 5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_then_success_within_three_attempts() {
        let backend = Box::new(FlakyBackend {
            failures: AtomicU32::new(2),
            dims: 4,
        });
        let gateway = EmbeddingGateway::new(backend, &config(8, 2)).unwrap();

        let texts = vec!["a".to_string(), "b".to_string()];
        let vectors = gateway.embed_all(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_the_batch() {
        let backend = Box::new(FlakyBackend {
            failures: AtomicU32::new(10),
            dims: 4,
        });
        let gateway = EmbeddingGateway::new(backend, &config(8, 2)).unwrap();

        let err = gateway.embed_all(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingBackend(_)));
    }

    #[tokio::test]
    async fn batches_are_isolated() {
        // 3 inputs with batch_size 2 → two provider calls, one result
        // per batch.
        let backend = Box::new(FlakyBackend {
            failures: AtomicU32::new(0),
            dims: 4,
        });
        let gateway = EmbeddingGateway::new(backend, &config(2, 0)).unwrap();

        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results = gateway.embed_batches(&texts).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(results[0].as_ref().unwrap().len(), 2);
        assert_eq!(results[1].as_ref().unwrap().len(), 1);
    }

    #[test]
    fn model_mismatch_is_a_startup_error() {
        let backend = Box::new(FlakyBackend {
            failures: AtomicU32::new(0),
            dims: 4,
        });
        let mut cfg = config(8, 0);
        cfg.model = Some("some-other-model".to_string());
        let err = EmbeddingGateway::new(backend, &cfg).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn cosine_bounds() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
