//! Article normalization.
//!
//! Turns lenient [`FeedEntry`] values into well-formed [`Document`]s:
//! HTML is stripped and entities decoded, whitespace is collapsed, and
//! optional fields are resolved through ordered fallbacks. Entries without
//! a usable link are rejected here (the caller logs and counts them).

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::models::{Document, FeedEntry};

/// Strip HTML tags, decode entities, and collapse whitespace.
///
/// Applying this to already-clean text returns it unchanged, so the
/// function is safe to call on fields that may or may not carry markup.
pub fn clean_text(raw: &str) -> String {
    // Plain text with no markup or entities skips the fragment parse.
    if !raw.contains('<') && !raw.contains('&') {
        return collapse_whitespace(raw);
    }

    let fragment = scraper::Html::parse_fragment(raw);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

/// Replace every run of whitespace (spaces, tabs, newlines) with a single
/// space and trim the ends.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derive a short display slug from a feed URL's host.
///
/// `https://www.example-news.co.uk/feed.xml` becomes `example_news`.
/// Unparseable URLs fall back to `"unknown_source"`.
pub fn source_name(feed_url: &str) -> String {
    let host = match url::Url::parse(feed_url) {
        Ok(u) => match u.host_str() {
            Some(h) => h.to_string(),
            None => return "unknown_source".to_string(),
        },
        Err(_) => return "unknown_source".to_string(),
    };

    let mut host = host.to_ascii_lowercase();
    for prefix in ["www.", "m.", "mobile."] {
        if let Some(rest) = host.strip_prefix(prefix) {
            host = rest.to_string();
            break;
        }
    }

    // Keep everything up to the registrable-suffix boundary: drop the last
    // label, and also a second-level label like "co" in "co.uk".
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let name = match labels.len() {
        0 => return "unknown_source".to_string(),
        1 => labels[0].to_string(),
        2 => labels[0].to_string(),
        n => {
            let second_last = labels[n - 2];
            if second_last.len() <= 3 && n >= 3 {
                labels[..n - 2].join(".")
            } else {
                labels[..n - 1].join(".")
            }
        }
    };

    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    if slug.chars().all(|c| c == '_') {
        "unknown_source".to_string()
    } else {
        slug
    }
}

/// Stable document identifier: hex SHA-256 of the article link.
pub fn document_id(link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(link.as_bytes());
    hex::encode(hasher.finalize())
}

/// Parse a feed date string, trying RFC 2822 (RSS) then RFC 3339 (Atom).
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    None
}

/// Normalize one feed entry into a [`Document`] without its embedding.
///
/// Returns `None` when the entry has no non-empty link; such entries have
/// no stable identity and cannot be deduplicated or cited.
///
/// Fallback order:
/// - title: entry title, else `"Untitled"`
/// - published: first parseable of `published`, `updated`
/// - summary: first non-empty of `summary`, `description`, `content`
pub fn normalize_entry(entry: &FeedEntry, source_url: &str, source: &str) -> Option<Document> {
    let link = entry
        .link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())?
        .to_string();

    let title = entry
        .title
        .as_deref()
        .map(clean_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let published = [entry.published.as_deref(), entry.updated.as_deref()]
        .into_iter()
        .flatten()
        .find_map(parse_date);

    if published.is_none() {
        if let Some(raw) = entry.published.as_deref().or(entry.updated.as_deref()) {
            debug!(link = %link, raw = %raw, "unparseable entry date, leaving unset");
        }
    }

    let summary = [
        entry.summary.as_deref(),
        entry.description.as_deref(),
        entry.content.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(clean_text)
    .find(|s| !s.is_empty())
    .unwrap_or_default();

    Some(Document {
        id: document_id(&link),
        title,
        summary,
        link,
        published,
        source_url: source_url.to_string(),
        source_name: source.to_string(),
        embedding: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_strips_tags_and_entities() {
        let cleaned = clean_text("<p>Rust &amp; <b>speed</b></p>");
        assert_eq!(cleaned, "Rust & speed");
    }

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("a\n\n  b\tc  "), "a b c");
    }

    #[test]
    fn test_clean_text_idempotent_on_plain_text() {
        let once = clean_text("already clean text");
        assert_eq!(once, "already clean text");
        assert_eq!(clean_text(&once), once);
    }

    #[test]
    fn test_source_name_strips_www_and_tld() {
        assert_eq!(source_name("https://www.example.com/feed"), "example");
        assert_eq!(source_name("http://m.news-site.org/rss"), "news_site");
    }

    #[test]
    fn test_source_name_compound_tld() {
        assert_eq!(source_name("https://www.bbc.co.uk/rss"), "bbc");
    }

    #[test]
    fn test_source_name_unparseable() {
        assert_eq!(source_name("not a url"), "unknown_source");
        assert_eq!(source_name(""), "unknown_source");
    }

    #[test]
    fn test_document_id_stable() {
        let a = document_id("https://example.com/story");
        let b = document_id("https://example.com/story");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, document_id("https://example.com/other"));
    }

    fn entry(link: Option<&str>) -> FeedEntry {
        FeedEntry {
            title: Some("A <b>Title</b>".to_string()),
            link: link.map(String::from),
            published: Some("Mon, 06 Sep 2021 12:00:00 +0000".to_string()),
            updated: None,
            summary: None,
            description: Some("<p>Body &gt; text</p>".to_string()),
            content: Some("full content".to_string()),
        }
    }

    #[test]
    fn test_normalize_entry_full() {
        let doc = normalize_entry(&entry(Some("https://e.com/x")), "https://e.com/feed", "e")
            .unwrap();
        assert_eq!(doc.title, "A Title");
        assert_eq!(doc.summary, "Body > text");
        assert_eq!(doc.link, "https://e.com/x");
        assert!(doc.published.is_some());
        assert_eq!(doc.source_url, "https://e.com/feed");
        assert!(doc.embedding.is_empty());
    }

    #[test]
    fn test_normalize_entry_requires_link() {
        assert!(normalize_entry(&entry(None), "https://e.com/feed", "e").is_none());
        assert!(normalize_entry(&entry(Some("   ")), "https://e.com/feed", "e").is_none());
    }

    #[test]
    fn test_normalize_entry_title_fallback() {
        let mut en = entry(Some("https://e.com/x"));
        en.title = None;
        let doc = normalize_entry(&en, "https://e.com/feed", "e").unwrap();
        assert_eq!(doc.title, "Untitled");
    }

    #[test]
    fn test_normalize_entry_date_fallback_to_updated() {
        let mut en = entry(Some("https://e.com/x"));
        en.published = Some("garbage date".to_string());
        en.updated = Some("2021-09-07T09:30:00Z".to_string());
        let doc = normalize_entry(&en, "https://e.com/feed", "e").unwrap();
        let published = doc.published.unwrap();
        assert_eq!(published.to_rfc3339(), "2021-09-07T09:30:00+00:00");
    }

    #[test]
    fn test_normalize_entry_summary_fallback_order() {
        let mut en = entry(Some("https://e.com/x"));
        en.summary = Some("  ".to_string());
        en.description = None;
        let doc = normalize_entry(&en, "https://e.com/feed", "e").unwrap();
        assert_eq!(doc.summary, "full content");
    }

    #[test]
    fn test_normalize_entry_unparseable_dates_left_unset() {
        let mut en = entry(Some("https://e.com/x"));
        en.published = Some("last tuesday".to_string());
        en.updated = Some("also not a date".to_string());
        let doc = normalize_entry(&en, "https://e.com/feed", "e").unwrap();
        assert!(doc.published.is_none());
    }
}
