//! CLI listing of ingested sources.

use anyhow::Result;

use crate::blob::create_blob_store;
use crate::config::Config;
use crate::store::ShardStore;

/// Print every committed shard as a table row.
pub async fn run_sources(config: &Config) -> Result<()> {
    let blob = create_blob_store(&config.store)?;
    let store = ShardStore::new(blob);

    let metas = store.list_sources().await?;
    if metas.is_empty() {
        println!("No sources ingested yet.");
        return Ok(());
    }

    println!(
        "{:<20} {:<40} {:>8} {:>6}  {:<20}",
        "SOURCE", "FEED", "ARTICLES", "DIMS", "CREATED"
    );
    for meta in &metas {
        println!(
            "{:<20} {:<40} {:>8} {:>6}  {:<20}",
            meta.source_name,
            truncate(&meta.feed_url, 40),
            meta.article_count,
            meta.dims,
            meta.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("\n{} shard(s)", metas.len());
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijk", 8), "abcde...");
    }
}
