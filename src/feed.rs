//! Feed fetching and parsing.
//!
//! [`FeedSource`] abstracts over where feed XML comes from so the ingestion
//! pipeline can be tested without a network. [`HttpFeedSource`] is the real
//! implementation; it fetches over HTTP(S) and hands the body to
//! [`parse_feed_xml`].
//!
//! The parser handles both RSS 2.0 (`<channel><item>`) and Atom
//! (`<feed><entry>`) with a single event loop. It is deliberately lenient:
//! unknown elements are ignored, and every entry field is optional. The
//! normalizer decides later which entries are usable.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Duration;

use crate::config::FeedConfig;
use crate::models::{Feed, FeedEntry};

/// A source of parsed feeds, keyed by feed URL.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse the feed at `feed_url`.
    async fn fetch(&self, feed_url: &str) -> Result<Feed>;
}

/// Fetches feeds over HTTP with a configured timeout and user agent.
pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build feed HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, feed_url: &str) -> Result<Feed> {
        let resp = self
            .client
            .get(feed_url)
            .send()
            .await
            .with_context(|| format!("failed to fetch feed {}", feed_url))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("feed {} returned HTTP {}", feed_url, status);
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("failed to read feed body from {}", feed_url))?;

        parse_feed_xml(&body)
    }
}

/// Which element's text content the parser is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    FeedTitle,
    Title,
    Link,
    Published,
    Updated,
    Summary,
    Description,
    Content,
}

/// Parse RSS 2.0 or Atom XML into a [`Feed`].
///
/// Entries are returned in document order. Dates are kept as raw strings;
/// the normalizer parses them with ordered format fallbacks.
///
/// # Errors
///
/// Fails on malformed XML or when the document contains no `<item>` and no
/// `<entry>` elements (not a feed).
pub fn parse_feed_xml(xml: &str) -> Result<Feed> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = Feed::default();
    let mut entry: Option<FeedEntry> = None;
    let mut field = Field::None;
    let mut saw_entry_element = false;

    loop {
        match reader.read_event().context("malformed feed XML")? {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"item" | b"entry" => {
                    saw_entry_element = true;
                    entry = Some(FeedEntry::default());
                }
                b"title" => {
                    field = if entry.is_some() {
                        Field::Title
                    } else {
                        Field::FeedTitle
                    };
                }
                b"link" if entry.is_some() => {
                    // Atom carries the URL in the href attribute.
                    if let Some(href) = attr_value(e, b"href") {
                        if let Some(ref mut en) = entry {
                            if en.link.is_none() {
                                en.link = Some(href);
                            }
                        }
                    } else {
                        field = Field::Link;
                    }
                }
                b"pubDate" | b"published" | b"date" if entry.is_some() => {
                    field = Field::Published;
                }
                b"updated" if entry.is_some() => field = Field::Updated,
                b"summary" if entry.is_some() => field = Field::Summary,
                b"description" if entry.is_some() => field = Field::Description,
                b"content" | b"encoded" if entry.is_some() => field = Field::Content,
                _ => {}
            },
            Event::Empty(ref e) => {
                // Self-closing Atom link: <link href="..."/>
                if entry.is_some() && e.local_name().as_ref() == b"link" {
                    if let Some(href) = attr_value(e, b"href") {
                        if let Some(ref mut en) = entry {
                            if en.link.is_none() {
                                en.link = Some(href);
                            }
                        }
                    }
                }
            }
            Event::Text(ref t) => {
                let text = t.unescape().context("bad entity in feed XML")?;
                apply_text(&mut feed, &mut entry, field, text.as_ref());
            }
            Event::CData(ref c) => {
                let text = String::from_utf8_lossy(c.as_ref()).into_owned();
                apply_text(&mut feed, &mut entry, field, &text);
            }
            Event::End(ref e) => {
                if matches!(e.local_name().as_ref(), b"item" | b"entry") {
                    if let Some(en) = entry.take() {
                        feed.entries.push(en);
                    }
                }
                field = Field::None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_entry_element {
        bail!("document contains no feed entries (not RSS or Atom?)");
    }

    Ok(feed)
}

fn apply_text(feed: &mut Feed, entry: &mut Option<FeedEntry>, field: Field, text: &str) {
    if text.is_empty() {
        return;
    }
    match (field, entry.as_mut()) {
        (Field::FeedTitle, None) => {
            if feed.title.is_none() {
                feed.title = Some(text.to_string());
            }
        }
        (Field::Title, Some(en)) => append(&mut en.title, text),
        (Field::Link, Some(en)) => append(&mut en.link, text),
        (Field::Published, Some(en)) => append(&mut en.published, text),
        (Field::Updated, Some(en)) => append(&mut en.updated, text),
        (Field::Summary, Some(en)) => append(&mut en.summary, text),
        (Field::Description, Some(en)) => append(&mut en.description, text),
        (Field::Content, Some(en)) => append(&mut en.content, text),
        _ => {}
    }
}

/// Text for one element can arrive in multiple events (entities split it).
fn append(slot: &mut Option<String>, text: &str) {
    match slot {
        Some(existing) => existing.push_str(text),
        None => *slot = Some(text.to_string()),
    }
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <item>
      <title>First story</title>
      <link>https://example.com/first</link>
      <pubDate>Mon, 06 Sep 2021 12:00:00 +0000</pubDate>
      <description><![CDATA[<p>Breaking &amp; important</p>]]></description>
    </item>
    <item>
      <title>Second story</title>
      <link>https://example.com/second</link>
      <description>Plain text body</description>
    </item>
  </channel>
</rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Planet</title>
  <entry>
    <title>Atom entry</title>
    <link href="https://example.org/a1"/>
    <published>2021-09-06T12:00:00Z</published>
    <updated>2021-09-07T09:30:00Z</updated>
    <summary>Short summary</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items_in_order() {
        let feed = parse_feed_xml(RSS_SAMPLE).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Example News"));
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].title.as_deref(), Some("First story"));
        assert_eq!(
            feed.entries[0].link.as_deref(),
            Some("https://example.com/first")
        );
        assert_eq!(
            feed.entries[0].published.as_deref(),
            Some("Mon, 06 Sep 2021 12:00:00 +0000")
        );
        assert_eq!(feed.entries[1].title.as_deref(), Some("Second story"));
    }

    #[test]
    fn test_rss_cdata_preserved_raw() {
        let feed = parse_feed_xml(RSS_SAMPLE).unwrap();
        // CDATA content is kept raw; tag stripping happens in the normalizer.
        assert_eq!(
            feed.entries[0].description.as_deref(),
            Some("<p>Breaking &amp; important</p>")
        );
    }

    #[test]
    fn test_parse_atom_entry() {
        let feed = parse_feed_xml(ATOM_SAMPLE).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Atom Planet"));
        assert_eq!(feed.entries.len(), 1);
        let entry = &feed.entries[0];
        assert_eq!(entry.link.as_deref(), Some("https://example.org/a1"));
        assert_eq!(entry.published.as_deref(), Some("2021-09-06T12:00:00Z"));
        assert_eq!(entry.updated.as_deref(), Some("2021-09-07T09:30:00Z"));
        assert_eq!(entry.summary.as_deref(), Some("Short summary"));
    }

    #[test]
    fn test_missing_fields_stay_none() {
        let xml = r#"<rss><channel><item><title>Bare</title></item></channel></rss>"#;
        let feed = parse_feed_xml(xml).unwrap();
        assert_eq!(feed.entries.len(), 1);
        assert!(feed.entries[0].link.is_none());
        assert!(feed.entries[0].published.is_none());
        assert!(feed.entries[0].description.is_none());
    }

    #[test]
    fn test_non_feed_document_rejected() {
        let err = parse_feed_xml("<html><body>not a feed</body></html>").unwrap_err();
        assert!(err.to_string().contains("no feed entries"));
    }

    #[test]
    fn test_malformed_xml_rejected() {
        assert!(parse_feed_xml("<rss><channel><item></wrong></channel></rss>").is_err());
    }

    #[test]
    fn test_namespaced_content_encoded() {
        let xml = r#"<rss><channel><item>
            <title>T</title>
            <content:encoded><![CDATA[full body]]></content:encoded>
        </item></channel></rss>"#;
        let feed = parse_feed_xml(xml).unwrap();
        assert_eq!(feed.entries[0].content.as_deref(), Some("full body"));
    }
}
