//! Semantic retrieval over committed shards.
//!
//! A query is validated, embedded once, then scored against every document
//! in every candidate shard by dot product (both sides are unit vectors,
//! so this is cosine similarity). Results are sorted by score descending
//! with ingestion order as the tie-break, optionally deduplicated by link,
//! and truncated to `top_k`.
//!
//! Shard failures are isolated: a shard that cannot be loaded is logged
//! and skipped. Only when every candidate shard fails does the query
//! surface [`Error::RetrievalUnavailable`].

use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::embedding::{dot, embed_query, Embedder};
use crate::error::{Error, Result};
use crate::models::{SearchResult, ShardMeta};
use crate::store::ShardStore;

pub struct RetrievalEngine {
    store: Arc<ShardStore>,
    embedder: Arc<dyn Embedder>,
    embed_cfg: EmbeddingConfig,
    dedupe_links: bool,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<ShardStore>,
        embedder: Arc<dyn Embedder>,
        embed_cfg: EmbeddingConfig,
        dedupe_links: bool,
    ) -> Self {
        Self {
            store,
            embedder,
            embed_cfg,
            dedupe_links,
        }
    }

    /// Run a semantic query and return the top `top_k` hits.
    ///
    /// `source_filter`, when set, restricts candidates to shards of that
    /// feed URL.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a blank query or `top_k == 0`, raised
    ///   before any embedding call.
    /// - [`Error::ShardNotFound`] when `source_filter` matches no shard.
    /// - [`Error::EmbeddingBackend`] when the query cannot be embedded.
    /// - [`Error::RetrievalUnavailable`] when every candidate shard failed
    ///   to load.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Validation("query must not be empty".to_string()));
        }
        if top_k == 0 {
            return Err(Error::Validation("top_k must be >= 1".to_string()));
        }

        let candidates = match source_filter {
            Some(filter) => {
                let shards = self.store.shards_for_source(filter).await?;
                if shards.is_empty() {
                    return Err(Error::ShardNotFound {
                        key: filter.to_string(),
                    });
                }
                shards
            }
            None => self.store.list_sources().await?,
        };

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.embedder.as_ref(), &self.embed_cfg, query).await?;

        let mut hits: Vec<SearchResult> = Vec::new();
        let mut failed_shards = 0usize;

        for shard in &candidates {
            let documents = match self.store.load_shard(&shard.name).await {
                Ok(docs) => docs,
                Err(e) => {
                    warn!(shard = %shard.name, error = %e, "skipping unloadable shard");
                    failed_shards += 1;
                    continue;
                }
            };

            for document in documents {
                if document.embedding.len() != query_vec.len() {
                    warn!(
                        shard = %shard.name,
                        link = %document.link,
                        doc_dims = document.embedding.len(),
                        query_dims = query_vec.len(),
                        "skipping document with mismatched embedding dimension"
                    );
                    continue;
                }
                let score = dot(&query_vec, &document.embedding);
                hits.push(result_from(shard, document, score));
            }
        }

        if failed_shards == candidates.len() {
            return Err(Error::RetrievalUnavailable {
                reason: format!("all {} candidate shards failed to load", failed_shards),
            });
        }

        // Stable sort keeps ingestion order among equal scores.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        if self.dedupe_links {
            let mut seen = HashSet::new();
            hits.retain(|hit| seen.insert(hit.link.clone()));
        }

        hits.truncate(top_k);
        Ok(hits)
    }
}

/// CLI entry: run a query and print ranked hits.
pub async fn run_search(
    config: &crate::config::Config,
    query: &str,
    top_k: Option<usize>,
    source: Option<&str>,
) -> anyhow::Result<()> {
    let blob = crate::blob::create_blob_store(&config.store)?;
    let store = Arc::new(ShardStore::new(blob));
    let embedder = crate::embedding::create_embedder(&config.embedding)?;
    let engine = RetrievalEngine::new(
        store,
        embedder,
        config.embedding.clone(),
        config.retrieval.dedupe_links,
    );

    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let hits = engine.search(query, top_k, source).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", rank + 1, hit.score, hit.title);
        println!("   {}", hit.link);
        if let Some(published) = hit.published {
            println!("   {} ({})", hit.feed_title, published.format("%Y-%m-%d"));
        } else {
            println!("   {}", hit.feed_title);
        }
        if !hit.summary.is_empty() {
            let snippet: String = hit.summary.chars().take(160).collect();
            println!("   {}", snippet);
        }
    }
    Ok(())
}

fn result_from(shard: &ShardMeta, document: crate::models::Document, score: f32) -> SearchResult {
    SearchResult {
        title: document.title,
        link: document.link,
        source_url: document.source_url,
        feed_url: shard.feed_url.clone(),
        feed_title: shard.feed_title.clone(),
        published: document.published,
        summary: document.summary,
        score,
    }
}
