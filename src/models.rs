//! Core data models used throughout syndex.
//!
//! These types represent the feed entries, documents, shards, and search
//! results that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw entry produced by a feed source before normalization.
///
/// Field presence varies wildly between feed dialects; the normalizer
/// applies ordered fallbacks over the optional fields.
#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    /// Date candidates in preference order (RSS `pubDate`, Atom
    /// `published`/`updated`, `dc:date`).
    pub published: Option<String>,
    pub updated: Option<String>,
    /// Body candidates in preference order.
    pub summary: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
}

/// A parsed feed: its own title plus entries in feed order.
#[derive(Debug, Clone, Default)]
pub struct Feed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// Normalized, embedded article persisted inside a shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier: hex SHA-256 of `link`, so re-ingesting the same
    /// feed yields the same logical ids across shard generations.
    pub id: String,
    pub title: String,
    /// Cleaned plain-text summary (tags stripped, entities decoded).
    pub summary: String,
    /// Canonical article URL; natural key within a source.
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    /// Feed URL this document was ingested from.
    pub source_url: String,
    /// Short slug derived from the source domain, used for display.
    pub source_name: String,
    /// Unit-L2-norm vector; same dimension for every document in a shard.
    pub embedding: Vec<f32>,
}

/// Feed-level metadata committed as a shard's manifest.
///
/// A shard exists (is listable and loadable) exactly when its metadata
/// record exists in the blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardMeta {
    /// Shard identifier: `<source-hash>/<creation-timestamp>`.
    pub name: String,
    pub feed_url: String,
    pub feed_title: String,
    pub source_name: String,
    pub article_count: usize,
    /// Embedding dimension shared by every document in the shard
    /// (0 for an empty shard).
    pub dims: usize,
    pub created_at: DateTime<Utc>,
}

/// A ranked hit returned from the retrieval engine. Transient, never
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub source_url: String,
    pub feed_url: String,
    pub feed_title: String,
    pub published: Option<DateTime<Utc>>,
    pub summary: String,
    /// Cosine similarity against the query, in `[-1, 1]`.
    pub score: f32,
}

/// Terminal status of one feed's ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Success,
    Error,
}

/// Per-feed ingestion result. Errors are carried here rather than raised
/// so one bad feed never aborts its siblings in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub feed_url: String,
    pub status: IngestStatus,
    pub message: String,
    pub articles_processed: usize,
    /// Entries dropped by the normalizer (no usable link).
    pub entries_skipped: usize,
    /// Committed shard identifier on success.
    pub shard: Option<String>,
}

impl IngestOutcome {
    pub fn error(feed_url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            status: IngestStatus::Error,
            message: message.into(),
            articles_processed: 0,
            entries_skipped: 0,
            shard: None,
        }
    }
}

/// Aggregate over a multi-feed ingestion batch.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<IngestOutcome>,
}

impl IngestSummary {
    pub fn from_outcomes(outcomes: Vec<IngestOutcome>) -> Self {
        let succeeded = outcomes
            .iter()
            .filter(|o| o.status == IngestStatus::Success)
            .count();
        Self {
            total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            outcomes,
        }
    }
}
