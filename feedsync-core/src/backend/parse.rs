//! Atom / RSS document parsing and feed discovery for the standalone backend.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::BackendError;
use crate::feed::{Enclosure, EntryContent, Feed, Link, RemoteEntry};

/// A feed document turned into domain records.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub feed: Feed,
    pub entries: Vec<RemoteEntry>,
}

#[derive(Debug)]
pub enum Document {
    Feed(ParsedFeed),
    /// An HTML page; carries the feed URLs it advertises.
    Html(Vec<String>),
}

/// Parses `body` fetched from `url`. The feed id is the URL the document was
/// requested from.
pub fn parse_document(url: &str, body: &[u8]) -> Result<Document, BackendError> {
    if let Ok(channel) = rss::Channel::read_from(body) {
        return Ok(Document::Feed(from_rss(url, &channel)));
    }
    if let Ok(feed) = atom_syndication::Feed::read_from(body) {
        return Ok(Document::Feed(from_atom(url, &feed)));
    }
    let text = String::from_utf8_lossy(body);
    if text.to_ascii_lowercase().contains("<html") {
        return Ok(Document::Html(discover_feed_links(url, &text)));
    }
    Err(BackendError::InvalidFeed(url.to_owned()))
}

/// Entry id for backends without native ids: a hash of the feed id and the
/// most stable key the item offers.
pub fn entry_hash(feed_id: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feed_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn from_rss(url: &str, channel: &rss::Channel) -> ParsedFeed {
    let mut links = vec![Link::new("self", url)];
    if !channel.link().is_empty() {
        links.push(Link::new("alternate", channel.link()));
    }
    let feed = Feed::new(url, channel.title(), links);

    let entries = channel
        .items()
        .iter()
        .map(|item| {
            let published = item
                .pub_date()
                .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
                .map(|dt| dt.with_timezone(&Utc));

            let author_name = item
                .dublin_core_ext()
                .and_then(|dc| dc.creators().first().map(|s| s.to_string()))
                .or_else(|| item.author().map(|s| s.to_string()));

            let key = item
                .guid()
                .map(|guid| guid.value())
                .or(item.link())
                .or(item.title())
                .unwrap_or_default();

            RemoteEntry {
                content: EntryContent {
                    id: entry_hash(url, key),
                    feed_id: url.to_owned(),
                    title: item.title().unwrap_or_default().to_owned(),
                    link: item.link().map(ToOwned::to_owned),
                    published,
                    updated: published,
                    author_name,
                    content_html: item
                        .content()
                        .or(item.description())
                        .map(ToOwned::to_owned),
                    enclosure: item.enclosure().map(|enclosure| Enclosure {
                        url: enclosure.url().to_owned(),
                        media_type: enclosure.mime_type().to_owned(),
                    }),
                    guid_hash: None,
                },
                read: None,
                bookmarked: None,
            }
        })
        .collect();

    ParsedFeed { feed, entries }
}

fn from_atom(url: &str, doc: &atom_syndication::Feed) -> ParsedFeed {
    let mut links = vec![Link::new("self", url)];
    if let Some(alternate) = doc
        .links()
        .iter()
        .find(|link| link.rel() == "alternate")
    {
        links.push(Link::new("alternate", alternate.href()));
    }
    let feed = Feed::new(url, doc.title().value.clone(), links);

    let entries = doc
        .entries()
        .iter()
        .map(|entry| {
            let link = entry
                .links()
                .iter()
                .find(|link| link.rel() == "alternate")
                .or(entry.links().first())
                .map(|link| link.href().to_owned());

            let enclosure = entry
                .links()
                .iter()
                .find(|link| link.rel() == "enclosure")
                .map(|link| Enclosure {
                    url: link.href().to_owned(),
                    media_type: link.mime_type().unwrap_or_default().to_owned(),
                });

            let key = if entry.id().is_empty() {
                link.as_deref().unwrap_or(entry.title().value.as_str())
            } else {
                entry.id()
            };

            RemoteEntry {
                content: EntryContent {
                    id: entry_hash(url, key),
                    feed_id: url.to_owned(),
                    title: entry.title().value.clone(),
                    link: link.clone(),
                    published: entry.published().map(|dt| dt.with_timezone(&Utc)),
                    updated: Some(entry.updated().with_timezone(&Utc)),
                    author_name: entry.authors().first().map(|p| p.name().to_owned()),
                    content_html: entry
                        .content()
                        .and_then(|content| content.value())
                        .map(ToOwned::to_owned)
                        .or_else(|| entry.summary().map(|summary| summary.value.clone())),
                    enclosure,
                    guid_hash: None,
                },
                read: None,
                bookmarked: None,
            }
        })
        .collect();

    ParsedFeed { feed, entries }
}

fn link_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<link\b[^>]*>").expect("valid link tag regex"))
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(rel|type|href)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("valid attribute regex")
    })
}

/// Finds `<link rel="alternate">` tags pointing at RSS or Atom documents and
/// resolves them against the page URL.
pub fn discover_feed_links(page_url: &str, html: &str) -> Vec<String> {
    let base = Url::parse(page_url).ok();
    let mut found = Vec::new();

    for tag in link_tag_regex().find_iter(html) {
        let (mut rel, mut kind, mut href) = (None, None, None);
        for attr in attribute_regex().captures_iter(tag.as_str()) {
            let value = attr
                .get(2)
                .or(attr.get(3))
                .map(|m| m.as_str().trim().to_owned());
            match attr[1].to_ascii_lowercase().as_str() {
                "rel" => rel = value,
                "type" => kind = value,
                "href" => href = value,
                _ => {}
            }
        }

        let is_alternate = rel.is_some_and(|rel| {
            rel.split_whitespace()
                .any(|part| part.eq_ignore_ascii_case("alternate"))
        });
        let is_feed = kind.is_some_and(|kind| {
            let kind = kind.to_ascii_lowercase();
            kind == "application/rss+xml" || kind == "application/atom+xml"
        });
        let Some(href) = href.filter(|_| is_alternate && is_feed) else {
            continue;
        };

        let resolved = match &base {
            Some(base) => base.join(&href).map(|u| u.to_string()).unwrap_or(href),
            None => href,
        };
        if !found.contains(&resolved) {
            found.push(resolved);
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>http://example.com/</link>
    <description>Test description</description>
    <item>
      <title>Item 1</title>
      <link>http://example.com/1</link>
      <guid>1</guid>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
      <description>First</description>
      <enclosure url="http://example.com/1.mp3" length="10" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <link rel="alternate" href="http://example.org/"/>
  <updated>2024-10-21T08:00:00Z</updated>
  <id>urn:uuid:feed</id>
  <entry>
    <title>Atom Entry</title>
    <link rel="alternate" href="http://example.org/a"/>
    <id>urn:uuid:entry-1</id>
    <updated>2024-10-21T08:00:00Z</updated>
    <author><name>Jo</name></author>
    <summary>Summary</summary>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items() {
        let Document::Feed(parsed) = parse_document("http://example.com/feed", RSS.as_bytes()).unwrap()
        else {
            panic!("expected a feed");
        };
        assert_eq!(parsed.feed.id, "http://example.com/feed");
        assert_eq!(parsed.feed.title, "Test Feed");
        assert_eq!(parsed.feed.alternate_link(), Some("http://example.com/"));
        assert_eq!(parsed.entries.len(), 1);

        let entry = &parsed.entries[0];
        assert_eq!(entry.content.id, entry_hash("http://example.com/feed", "1"));
        assert_eq!(entry.content.enclosure.as_ref().unwrap().media_type, "audio/mpeg");
        assert!(entry.content.published.is_some());
        assert_eq!(entry.read, None);
    }

    #[test]
    fn parses_atom_entries() {
        let Document::Feed(parsed) = parse_document("http://example.org/atom", ATOM.as_bytes()).unwrap()
        else {
            panic!("expected a feed");
        };
        assert_eq!(parsed.feed.title, "Atom Feed");
        let entry = &parsed.entries[0];
        assert_eq!(entry.content.title, "Atom Entry");
        assert_eq!(entry.content.link.as_deref(), Some("http://example.org/a"));
        assert_eq!(entry.content.author_name.as_deref(), Some("Jo"));
        assert_eq!(entry.content.content_html.as_deref(), Some("Summary"));
    }

    #[test]
    fn discovers_alternate_links_in_html() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/style.css">
            <link rel="alternate" type="application/rss+xml" href="/feed.xml">
            <link href='https://other.example/atom' type='application/atom+xml' rel='alternate'>
            </head><body></body></html>"#;
        let links = discover_feed_links("https://blog.example/post/1", html);
        assert_eq!(
            links,
            vec![
                "https://blog.example/feed.xml".to_string(),
                "https://other.example/atom".to_string()
            ]
        );
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_document("http://x", b"definitely not a feed").unwrap_err();
        assert!(matches!(err, BackendError::InvalidFeed(_)));
    }

    #[test]
    fn entry_hash_is_scoped_to_feed() {
        assert_ne!(entry_hash("a", "1"), entry_hash("b", "1"));
        assert_eq!(entry_hash("a", "1"), entry_hash("a", "1"));
    }
}
