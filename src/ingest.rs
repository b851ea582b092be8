//! Feed ingestion pipeline.
//!
//! Coordinates the full flow for each feed: fetch → normalize → embed →
//! shard write. Feeds in a batch are fully isolated from each other; a
//! failure anywhere in one feed's flow becomes an error [`IngestOutcome`]
//! for that feed and never aborts its siblings.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, EmbeddingConfig};
use crate::embedding::{create_embedder, embed_texts, Embedder};
use crate::error::Error;
use crate::feed::{FeedSource, HttpFeedSource};
use crate::models::{Document, IngestOutcome, IngestStatus, IngestSummary};
use crate::normalize::{normalize_entry, source_name};
use crate::store::ShardStore;

pub struct IngestPipeline {
    feed_source: Arc<dyn FeedSource>,
    embedder: Arc<dyn Embedder>,
    embed_cfg: EmbeddingConfig,
    store: Arc<ShardStore>,
}

impl IngestPipeline {
    pub fn new(
        feed_source: Arc<dyn FeedSource>,
        embedder: Arc<dyn Embedder>,
        embed_cfg: EmbeddingConfig,
        store: Arc<ShardStore>,
    ) -> Self {
        Self {
            feed_source,
            embedder,
            embed_cfg,
            store,
        }
    }

    /// Ingest one feed into a new shard generation.
    ///
    /// Never returns `Err`; every failure mode is folded into the
    /// returned [`IngestOutcome`] so batch callers stay isolated.
    pub async fn ingest_feed(&self, feed_url: &str, max_articles: Option<usize>) -> IngestOutcome {
        match self.try_ingest(feed_url, max_articles).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(feed_url = %feed_url, error = %e, "feed ingestion failed");
                IngestOutcome::error(feed_url, e.to_string())
            }
        }
    }

    async fn try_ingest(
        &self,
        feed_url: &str,
        max_articles: Option<usize>,
    ) -> crate::Result<IngestOutcome> {
        let feed = self
            .feed_source
            .fetch(feed_url)
            .await
            .map_err(|e| Error::Feed {
                url: feed_url.to_string(),
                reason: e.to_string(),
            })?;

        let feed_title = feed
            .title
            .clone()
            .unwrap_or_else(|| "Untitled feed".to_string());
        let source = source_name(feed_url);

        let mut entries = feed.entries;
        if let Some(cap) = max_articles {
            entries.truncate(cap);
        }
        let total_entries = entries.len();

        let mut documents: Vec<Document> = Vec::with_capacity(entries.len());
        for entry in &entries {
            match normalize_entry(entry, feed_url, &source) {
                Some(doc) => documents.push(doc),
                None => {
                    warn!(feed_url = %feed_url, title = ?entry.title, "skipping entry without link");
                }
            }
        }
        let entries_skipped = total_entries - documents.len();

        if documents.is_empty() {
            return Ok(IngestOutcome {
                feed_url: feed_url.to_string(),
                status: IngestStatus::Error,
                message: "No articles found in feed".to_string(),
                articles_processed: 0,
                entries_skipped,
                shard: None,
            });
        }

        // Title and summary together form the embedded text.
        let texts: Vec<String> = documents
            .iter()
            .map(|d| format!("{} {}", d.title, d.summary).trim().to_string())
            .collect();
        let vectors = embed_texts(self.embedder.as_ref(), &self.embed_cfg, &texts).await?;
        if vectors.len() != documents.len() {
            return Err(Error::EmbeddingBackend {
                reason: format!(
                    "got {} vectors for {} documents",
                    vectors.len(),
                    documents.len()
                ),
            });
        }
        for (doc, vector) in documents.iter_mut().zip(vectors) {
            doc.embedding = vector;
        }

        let meta = self
            .store
            .write_shard(feed_url, &feed_title, &source, &documents)
            .await?;

        info!(
            feed_url = %feed_url,
            shard = %meta.name,
            articles = meta.article_count,
            skipped = entries_skipped,
            "ingested feed"
        );

        Ok(IngestOutcome {
            feed_url: feed_url.to_string(),
            status: IngestStatus::Success,
            message: format!("Ingested {} articles", meta.article_count),
            articles_processed: meta.article_count,
            entries_skipped,
            shard: Some(meta.name),
        })
    }

    /// Ingest a batch of feeds, one outcome per feed in input order.
    pub async fn ingest_feeds(
        &self,
        feed_urls: &[String],
        max_articles: Option<usize>,
    ) -> IngestSummary {
        let mut outcomes = Vec::with_capacity(feed_urls.len());
        for url in feed_urls {
            outcomes.push(self.ingest_feed(url, max_articles).await);
        }
        IngestSummary::from_outcomes(outcomes)
    }
}

/// Build the pipeline from configuration, wiring real backends.
pub fn build_pipeline(config: &Config, store: Arc<ShardStore>) -> crate::Result<IngestPipeline> {
    let feed_source = HttpFeedSource::new(&config.feed)
        .map_err(|e| Error::Config(format!("failed to build feed client: {}", e)))?;
    let embedder = create_embedder(&config.embedding)?;
    Ok(IngestPipeline::new(
        Arc::new(feed_source),
        embedder,
        config.embedding.clone(),
        store,
    ))
}

/// CLI entry: ingest feeds and print a per-feed report.
pub async fn run_ingest(
    config: &Config,
    feed_urls: &[String],
    max_articles: Option<usize>,
) -> anyhow::Result<()> {
    let blob = crate::blob::create_blob_store(&config.store)?;
    let store = Arc::new(ShardStore::new(blob));
    let pipeline = build_pipeline(config, store)?;

    let cap = max_articles.or(config.feed.max_articles);
    let summary = pipeline.ingest_feeds(feed_urls, cap).await;

    for outcome in &summary.outcomes {
        match outcome.status {
            IngestStatus::Success => {
                println!(
                    "OK    {} ({} articles, {} skipped) -> {}",
                    outcome.feed_url,
                    outcome.articles_processed,
                    outcome.entries_skipped,
                    outcome.shard.as_deref().unwrap_or("-")
                );
            }
            IngestStatus::Error => {
                println!("FAIL  {}: {}", outcome.feed_url, outcome.message);
            }
        }
    }
    println!(
        "\n{} feeds: {} succeeded, {} failed",
        summary.total, summary.succeeded, summary.failed
    );

    if summary.succeeded == 0 && summary.total > 0 {
        anyhow::bail!("all feeds failed to ingest");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::models::{Feed, FeedEntry};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StaticFeedSource {
        feeds: HashMap<String, Feed>,
    }

    #[async_trait]
    impl FeedSource for StaticFeedSource {
        async fn fetch(&self, feed_url: &str) -> anyhow::Result<Feed> {
            match self.feeds.get(feed_url) {
                Some(feed) => Ok(feed.clone()),
                None => bail!("connection refused"),
            }
        }
    }

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn entry(title: &str, link: Option<&str>) -> FeedEntry {
        FeedEntry {
            title: Some(title.to_string()),
            link: link.map(String::from),
            summary: Some(format!("{} summary", title)),
            ..Default::default()
        }
    }

    fn pipeline_with(feeds: HashMap<String, Feed>) -> (Arc<ShardStore>, IngestPipeline) {
        let store = Arc::new(ShardStore::new(Arc::new(MemoryBlobStore::new())));
        let pipeline = IngestPipeline::new(
            Arc::new(StaticFeedSource { feeds }),
            Arc::new(FixedEmbedder),
            EmbeddingConfig::default(),
            store.clone(),
        );
        (store, pipeline)
    }

    fn sample_feed(n: usize) -> Feed {
        Feed {
            title: Some("Sample".to_string()),
            entries: (0..n)
                .map(|i| {
                    entry(
                        &format!("story {}", i),
                        Some(&format!("https://s.com/{}", i)),
                    )
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_ingest_success_commits_shard() {
        let mut feeds = HashMap::new();
        feeds.insert("https://s.com/feed".to_string(), sample_feed(3));
        let (store, pipeline) = pipeline_with(feeds);

        let outcome = pipeline.ingest_feed("https://s.com/feed", None).await;
        assert_eq!(outcome.status, IngestStatus::Success);
        assert_eq!(outcome.articles_processed, 3);
        assert_eq!(outcome.entries_skipped, 0);

        let shard = outcome.shard.unwrap();
        let docs = store.load_shard(&shard).await.unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].embedding, vec![1.0, 0.0]);
        assert_eq!(docs[0].source_name, "s");
    }

    #[tokio::test]
    async fn test_max_articles_caps_entries() {
        let mut feeds = HashMap::new();
        feeds.insert("https://s.com/feed".to_string(), sample_feed(10));
        let (_, pipeline) = pipeline_with(feeds);

        let outcome = pipeline.ingest_feed("https://s.com/feed", Some(4)).await;
        assert_eq!(outcome.articles_processed, 4);
    }

    #[tokio::test]
    async fn test_linkless_entries_counted_as_skipped() {
        let feed = Feed {
            title: Some("Sample".to_string()),
            entries: vec![
                entry("good", Some("https://s.com/1")),
                entry("no link", None),
                entry("also good", Some("https://s.com/2")),
            ],
        };
        let mut feeds = HashMap::new();
        feeds.insert("https://s.com/feed".to_string(), feed);
        let (_, pipeline) = pipeline_with(feeds);

        let outcome = pipeline.ingest_feed("https://s.com/feed", None).await;
        assert_eq!(outcome.status, IngestStatus::Success);
        assert_eq!(outcome.articles_processed, 2);
        assert_eq!(outcome.entries_skipped, 1);
    }

    #[tokio::test]
    async fn test_all_entries_unusable_is_error_outcome() {
        let feed = Feed {
            title: Some("Sample".to_string()),
            entries: vec![entry("no link", None)],
        };
        let mut feeds = HashMap::new();
        feeds.insert("https://s.com/feed".to_string(), feed);
        let (store, pipeline) = pipeline_with(feeds);

        let outcome = pipeline.ingest_feed("https://s.com/feed", None).await;
        assert_eq!(outcome.status, IngestStatus::Error);
        assert!(outcome.message.contains("No articles"));
        assert!(store.list_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_feed_is_error_outcome() {
        let (_, pipeline) = pipeline_with(HashMap::new());
        let outcome = pipeline.ingest_feed("https://down.com/feed", None).await;
        assert_eq!(outcome.status, IngestStatus::Error);
        assert!(outcome.message.contains("down.com"));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let mut feeds = HashMap::new();
        feeds.insert("https://s.com/feed".to_string(), sample_feed(2));
        let (_, pipeline) = pipeline_with(feeds);

        let urls = vec![
            "https://down.com/feed".to_string(),
            "https://s.com/feed".to_string(),
        ];
        let summary = pipeline.ingest_feeds(&urls, None).await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        // Outcomes stay in input order.
        assert_eq!(summary.outcomes[0].feed_url, "https://down.com/feed");
        assert_eq!(summary.outcomes[0].status, IngestStatus::Error);
        assert_eq!(summary.outcomes[1].status, IngestStatus::Success);
    }

    #[tokio::test]
    async fn test_embedding_failure_fails_feed_without_shard() {
        struct BrokenEmbedder;

        #[async_trait]
        impl Embedder for BrokenEmbedder {
            fn model_name(&self) -> &str {
                "broken"
            }
            fn dims(&self) -> usize {
                2
            }
            async fn embed_batch(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
                bail!("backend down")
            }
        }

        let mut feeds = HashMap::new();
        feeds.insert("https://s.com/feed".to_string(), sample_feed(2));
        let store = Arc::new(ShardStore::new(Arc::new(MemoryBlobStore::new())));
        let pipeline = IngestPipeline::new(
            Arc::new(StaticFeedSource { feeds }),
            Arc::new(BrokenEmbedder),
            EmbeddingConfig::default(),
            store.clone(),
        );

        let outcome = pipeline.ingest_feed("https://s.com/feed", None).await;
        assert_eq!(outcome.status, IngestStatus::Error);
        assert!(store.list_sources().await.unwrap().is_empty());
    }
}
