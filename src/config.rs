use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Blob store backend selection.
///
/// `backend = "fs"` keeps shards under a local directory; `backend = "s3"`
/// talks to an S3-compatible object store (credentials from the standard
/// `AWS_*` environment variables).
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: String,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// What to do when a batch fails after retries: `"error"` surfaces the
    /// failure; `"zero"` substitutes logged zero vectors (opt-in degraded
    /// mode — zero vectors score near nothing and can mask real results).
    #[serde(default = "default_on_failure")]
    pub on_failure: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 32,
            max_retries: 5,
            timeout_secs: 30,
            on_failure: "error".to_string(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_on_failure() -> String {
    "error".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn zero_on_failure(&self) -> bool {
        self.on_failure == "zero"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Default cap on entries per feed; `ingest --max-articles` overrides.
    #[serde(default)]
    pub max_articles: Option<usize>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_feed_timeout_secs(),
            user_agent: default_user_agent(),
            max_articles: None,
        }
    }
}

fn default_feed_timeout_secs() -> u64 {
    20
}
fn default_user_agent() -> String {
    format!("syndex/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Collapse repeated links across shard generations at query time,
    /// keeping the highest-scoring copy.
    #[serde(default = "default_dedupe_links")]
    pub dedupe_links: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            dedupe_links: default_dedupe_links(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_dedupe_links() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.store.backend.as_str() {
        "fs" => {
            if config.store.root.is_none() {
                anyhow::bail!("store.root is required when store.backend is 'fs'");
            }
        }
        "s3" => {
            if config.store.bucket.is_none() || config.store.region.is_none() {
                anyhow::bail!(
                    "store.bucket and store.region are required when store.backend is 's3'"
                );
            }
        }
        other => anyhow::bail!("Unknown store backend: '{}'. Must be fs or s3.", other),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.on_failure.as_str() {
        "error" | "zero" => {}
        other => anyhow::bail!(
            "Unknown embedding.on_failure: '{}'. Must be error or zero.",
            other
        ),
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_fs_config() {
        let config = parse(
            r#"
            [store]
            backend = "fs"
            root = "/tmp/shards"
            "#,
        )
        .unwrap();
        assert_eq!(config.store.backend, "fs");
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.retrieval.top_k, 5);
        assert!(config.retrieval.dedupe_links);
        assert_eq!(config.embedding.on_failure, "error");
    }

    #[test]
    fn test_fs_requires_root() {
        let err = parse(
            r#"
            [store]
            backend = "fs"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("store.root"));
    }

    #[test]
    fn test_s3_requires_bucket_and_region() {
        let err = parse(
            r#"
            [store]
            backend = "s3"
            bucket = "feeds"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("store.region"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = parse(
            r#"
            [store]
            backend = "gcs"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown store backend"));
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let err = parse(
            r#"
            [store]
            backend = "fs"
            root = "/tmp/shards"

            [embedding]
            provider = "openai"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_on_failure_rejected() {
        let err = parse(
            r#"
            [store]
            backend = "fs"
            root = "/tmp/shards"

            [embedding]
            on_failure = "silent"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("on_failure"));
    }

    #[test]
    fn test_top_k_must_be_positive() {
        let err = parse(
            r#"
            [store]
            backend = "fs"
            root = "/tmp/shards"

            [retrieval]
            top_k = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }
}
