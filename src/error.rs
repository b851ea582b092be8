//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Failures are classified so callers can tell bad input apart from
//! backend trouble:
//!
//! - [`Error::Validation`] — bad caller input (empty query, zero top-k).
//!   Reported immediately, never retried.
//! - [`Error::EmbeddingBackend`] — the embedding backend failed or timed
//!   out after retries were exhausted.
//! - [`Error::ShardNotFound`] — a shard identifier did not resolve.
//! - [`Error::RetrievalUnavailable`] — every candidate shard for a query
//!   was unusable.
//! - [`Error::StorageWrite`] — persisting a shard failed; the shard was
//!   never published so nothing is partially visible.
//! - [`Error::Feed`] — the feed could not be fetched or parsed at all.
//!
//! Per-item failures (one document, one shard, one feed among many) are
//! logged and isolated by the layer that encounters them; only global
//! preconditions surface as one of these errors.

use thiserror::Error;

/// Typed error for all library operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input, detected before any remote call is made.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The embedding backend failed after retries were exhausted.
    #[error("embedding backend failed: {reason}")]
    EmbeddingBackend { reason: String },

    /// A shard identifier or source filter did not resolve to any shard.
    #[error("shard not found: {key}")]
    ShardNotFound { key: String },

    /// No candidate shard could be loaded for a query.
    #[error("retrieval unavailable: {reason}")]
    RetrievalUnavailable { reason: String },

    /// A shard write failed before its manifest was committed.
    #[error("shard write failed for {feed_url}: {reason}")]
    StorageWrite { feed_url: String, reason: String },

    /// A feed could not be fetched or parsed.
    #[error("feed error for {url}: {reason}")]
    Feed { url: String, reason: String },

    /// Configuration is missing or inconsistent.
    #[error("config error: {0}")]
    Config(String),
}

/// Library-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
