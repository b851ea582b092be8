//! Shard store: immutable, source-scoped document shards over a blob store.
//!
//! Layout under the blob store:
//!
//! ```text
//! shards/<source-hash>/<timestamp>/documents.json
//! shards/<source-hash>/<timestamp>/metadata.json
//! ```
//!
//! `<source-hash>` is the hex SHA-256 of the feed URL, so every feed owns
//! its own key space and re-ingestion never touches another source's
//! shards. `<timestamp>` is the UTC creation time, which makes each
//! ingestion run a new immutable generation.
//!
//! `metadata.json` is written LAST and acts as the commit record: a shard
//! is visible to [`ShardStore::list_sources`] exactly when its metadata
//! exists. A crash between the two writes leaves an orphaned documents
//! file that no reader will ever observe.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::models::{Document, ShardMeta};

const SHARD_PREFIX: &str = "shards";
const DOCUMENTS_FILE: &str = "documents.json";
const METADATA_FILE: &str = "metadata.json";

/// Hex SHA-256 of a feed URL; the per-source shard namespace.
pub fn shard_key_for(source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Versioned shard storage on top of a [`BlobStore`].
pub struct ShardStore {
    blob: Arc<dyn BlobStore>,
}

impl ShardStore {
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self { blob }
    }

    /// Write a new shard generation for `source_url` and commit it.
    ///
    /// Documents are stored in the order given; that order is the
    /// ingestion order used for tie-breaking at query time. All documents
    /// must share one embedding dimension.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] on mixed embedding dimensions,
    /// [`Error::StorageWrite`] when either blob write fails. On failure no
    /// metadata is committed, so the partial shard stays invisible.
    pub async fn write_shard(
        &self,
        source_url: &str,
        feed_title: &str,
        source_name: &str,
        documents: &[Document],
    ) -> Result<ShardMeta> {
        let dims = documents.first().map(|d| d.embedding.len()).unwrap_or(0);
        if let Some(bad) = documents.iter().find(|d| d.embedding.len() != dims) {
            return Err(Error::Validation(format!(
                "mixed embedding dimensions in shard: {} vs {}",
                dims,
                bad.embedding.len()
            )));
        }

        let created_at = Utc::now();
        let name = format!(
            "{}/{}",
            shard_key_for(source_url),
            created_at.format("%Y%m%dT%H%M%S%.3fZ")
        );

        let meta = ShardMeta {
            name: name.clone(),
            feed_url: source_url.to_string(),
            feed_title: feed_title.to_string(),
            source_name: source_name.to_string(),
            article_count: documents.len(),
            dims,
            created_at,
        };

        let docs_json = serde_json::to_vec(documents).map_err(|e| Error::StorageWrite {
            feed_url: source_url.to_string(),
            reason: format!("failed to encode documents: {}", e),
        })?;
        let meta_json = serde_json::to_vec(&meta).map_err(|e| Error::StorageWrite {
            feed_url: source_url.to_string(),
            reason: format!("failed to encode metadata: {}", e),
        })?;

        self.blob
            .put(&format!("{}/{}/{}", SHARD_PREFIX, name, DOCUMENTS_FILE), &docs_json)
            .await
            .map_err(|e| Error::StorageWrite {
                feed_url: source_url.to_string(),
                reason: e.to_string(),
            })?;

        // Metadata last: committing the shard.
        self.blob
            .put(&format!("{}/{}/{}", SHARD_PREFIX, name, METADATA_FILE), &meta_json)
            .await
            .map_err(|e| Error::StorageWrite {
                feed_url: source_url.to_string(),
                reason: e.to_string(),
            })?;

        debug!(shard = %name, articles = documents.len(), "committed shard");
        Ok(meta)
    }

    /// List every committed shard, sorted by shard name.
    ///
    /// Shards whose metadata fails to load or parse are logged and
    /// skipped; one corrupt shard never hides the rest.
    ///
    /// # Errors
    ///
    /// [`Error::RetrievalUnavailable`] only when the underlying listing
    /// itself fails.
    pub async fn list_sources(&self) -> Result<Vec<ShardMeta>> {
        let keys = self
            .blob
            .list(&format!("{}/", SHARD_PREFIX))
            .await
            .map_err(|e| Error::RetrievalUnavailable {
                reason: format!("shard listing failed: {}", e),
            })?;

        let mut metas = Vec::new();
        for key in keys.iter().filter(|k| k.ends_with(METADATA_FILE)) {
            let bytes = match self.blob.get(key).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unreadable shard metadata");
                    continue;
                }
            };
            match serde_json::from_slice::<ShardMeta>(&bytes) {
                Ok(meta) => metas.push(meta),
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping corrupt shard metadata");
                }
            }
        }

        metas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(metas)
    }

    /// List committed shards belonging to one feed URL.
    pub async fn shards_for_source(&self, source_url: &str) -> Result<Vec<ShardMeta>> {
        let hash = shard_key_for(source_url);
        let metas = self.list_sources().await?;
        Ok(metas
            .into_iter()
            .filter(|m| m.name.starts_with(&hash) || m.feed_url == source_url)
            .collect())
    }

    /// Load the documents of one shard by name.
    ///
    /// # Errors
    ///
    /// [`Error::ShardNotFound`] when the shard's documents cannot be read
    /// or decoded.
    pub async fn load_shard(&self, name: &str) -> Result<Vec<Document>> {
        let key = format!("{}/{}/{}", SHARD_PREFIX, name, DOCUMENTS_FILE);
        let bytes = self.blob.get(&key).await.map_err(|_| Error::ShardNotFound {
            key: name.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|_| Error::ShardNotFound {
            key: name.to_string(),
        })
    }
}
