//! Embedding backend abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAiEmbedder`]** — calls the OpenAI embeddings API with retry and backoff.
//!
//! [`embed_texts`] is the entry point callers use. It splits oversized
//! batches transparently, enforces the one-vector-per-text / fixed-dimension
//! contract, and L2-normalizes every returned vector so that downstream
//! cosine similarity reduces to a plain dot product.
//!
//! # Degraded mode
//!
//! When a batch fails after retries, the default is to surface
//! [`Error::EmbeddingBackend`]. With `embedding.on_failure = "zero"` the
//! failure is logged and each failed text gets a zero vector instead. This
//! is opt-in and never silent: zero vectors can masquerade as low-relevance
//! real results.
//!
//! # Retry Strategy
//!
//! The OpenAI backend uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::bail;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// A backend that turns text batches into fixed-dimension vectors.
///
/// Implementations perform the raw call only; batching, validation, and
/// normalization live in [`embed_texts`]. The handle is shared read-only
/// across concurrent requests, so implementations must be `Send + Sync`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed one batch, returning one raw vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Embed a batch of texts, enforcing the embedder contract.
///
/// Splits `texts` into chunks of `config.batch_size`, calls the backend per
/// chunk, and concatenates the results so chunking never changes output.
/// Every vector is checked against `embedder.dims()` and L2-normalized.
///
/// An empty input returns an empty output without touching the backend.
///
/// # Errors
///
/// [`Error::EmbeddingBackend`] when the backend fails after retries or
/// violates the count/dimension contract — unless degraded mode
/// (`on_failure = "zero"`) is configured, in which case the failed chunk
/// is replaced by logged zero vectors.
pub async fn embed_texts(
    embedder: &dyn Embedder,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let batch_size = config.batch_size.max(1);
    let mut out = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size) {
        match embedder.embed_batch(batch).await {
            Ok(mut vectors) => {
                if vectors.len() != batch.len() {
                    return Err(Error::EmbeddingBackend {
                        reason: format!(
                            "backend returned {} vectors for {} texts",
                            vectors.len(),
                            batch.len()
                        ),
                    });
                }
                for vec in &mut vectors {
                    if vec.len() != embedder.dims() {
                        return Err(Error::EmbeddingBackend {
                            reason: format!(
                                "backend returned a {}-dim vector, expected {}",
                                vec.len(),
                                embedder.dims()
                            ),
                        });
                    }
                    l2_normalize(vec);
                }
                out.extend(vectors);
            }
            Err(e) if config.zero_on_failure() => {
                warn!(
                    model = embedder.model_name(),
                    failed_texts = batch.len(),
                    error = %e,
                    "embedding batch failed; substituting zero vectors (degraded mode)"
                );
                out.extend(std::iter::repeat_with(|| vec![0.0; embedder.dims()]).take(batch.len()));
            }
            Err(e) => {
                return Err(Error::EmbeddingBackend {
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(out)
}

/// Embed a single query text.
///
/// Convenience wrapper around [`embed_texts`] for the retrieval engine.
pub async fn embed_query(
    embedder: &dyn Embedder,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>> {
    let results = embed_texts(embedder, config, &[text.to_string()]).await?;
    results.into_iter().next().ok_or(Error::EmbeddingBackend {
        reason: "empty embedding response".to_string(),
    })
}

// ============ Disabled Embedder ============

/// A no-op embedder that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.")
    }
}

// ============ OpenAI Embedder ============

/// Embedding backend using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Config("embedding.model required for OpenAI provider".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| Error::Config("embedding.dims required for OpenAI provider".into()))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays in response order, which matches
/// input order per the API contract.
fn parse_openai_response(json: &serde_json::Value) -> anyhow::Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    anyhow::anyhow!("Invalid OpenAI response: non-numeric embedding element")
                })
            })
            .collect::<anyhow::Result<_>>()?;

        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Create the appropriate [`Embedder`] based on configuration.
///
/// # Errors
///
/// Returns [`Error::Config`] for unknown provider names or when the OpenAI
/// backend cannot be initialized (missing config or API key).
pub fn create_embedder(config: &EmbeddingConfig) -> Result<std::sync::Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(std::sync::Arc::new(DisabledEmbedder)),
        "openai" => Ok(std::sync::Arc::new(OpenAiEmbedder::new(config)?)),
        other => Err(Error::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Vector utilities ============

/// Dot product of two equal-length vectors.
///
/// Both sides are unit-normalized at embedding time, so this equals cosine
/// similarity. Callers are responsible for the length check.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scale a vector to unit L2 norm in place. A zero vector is left as-is.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return;
    }
    for x in vec.iter_mut() {
        *x /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder that records how many backend calls it served.
    struct CountingEmbedder {
        dims: usize,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingEmbedder {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("backend down");
            }
            // Unnormalized on purpose: embed_texts must normalize.
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    let mut v = vec![0.0; self.dims];
                    v[i % self.dims] = 2.0;
                    v
                })
                .collect())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {}", i)).collect()
    }

    #[tokio::test]
    async fn test_empty_input_skips_backend() {
        let embedder = CountingEmbedder::new(4);
        let config = EmbeddingConfig::default();
        let out = embed_texts(&embedder, &config, &[]).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_order_count_and_unit_norm() {
        let embedder = CountingEmbedder::new(4);
        let config = EmbeddingConfig::default();
        let out = embed_texts(&embedder, &config, &texts(6)).await.unwrap();
        assert_eq!(out.len(), 6);
        for (i, v) in out.iter().enumerate() {
            assert_eq!(v.len(), 4);
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6, "vector {} not unit norm", i);
            // Order preserved: the hot index cycles with input position.
            assert!(v[i % 4] > 0.9);
        }
    }

    #[tokio::test]
    async fn test_chunking_is_transparent() {
        let embedder = CountingEmbedder::new(4);
        let config = EmbeddingConfig {
            batch_size: 2,
            ..Default::default()
        };
        let out = embed_texts(&embedder, &config, &texts(5)).await.unwrap();
        assert_eq!(out.len(), 5);
        // 5 texts at batch_size 2 → 3 backend calls.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_surfaces_by_default() {
        let embedder = CountingEmbedder::failing(4);
        let config = EmbeddingConfig::default();
        let err = embed_texts(&embedder, &config, &texts(2)).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingBackend { .. }));
    }

    #[tokio::test]
    async fn test_zero_vectors_only_when_opted_in() {
        let embedder = CountingEmbedder::failing(4);
        let config = EmbeddingConfig {
            on_failure: "zero".to_string(),
            ..Default::default()
        };
        let out = embed_texts(&embedder, &config, &texts(3)).await.unwrap();
        assert_eq!(out.len(), 3);
        for v in &out {
            assert!(v.iter().all(|&x| x == 0.0));
        }
    }

    #[tokio::test]
    async fn test_disabled_embedder_errors() {
        let config = EmbeddingConfig::default();
        let err = embed_query(&DisabledEmbedder, &config, "query")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingBackend { .. }));
    }

    #[test]
    fn test_dot_of_unit_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(dot(&a, &b).abs() < 1e-6);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_parse_openai_response() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2] },
                { "embedding": [0.3, 0.4] },
            ]
        });
        let out = parse_openai_response(&json).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], vec![0.1, 0.2]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        let json = serde_json::json!({ "unexpected": true });
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn test_parse_openai_response_non_numeric_element() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, "oops", 0.3] },
            ]
        });
        let err = parse_openai_response(&json).unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
    }
}
