use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_status, Backend, BackendKind, CursorKind, EntryBatches, IncrementalCursor};
use crate::error::BackendError;
use crate::feed::{Enclosure, Entry, EntryContent, Feed, Link, RemoteEntry};

/// Miniflux REST API. Pages walk backwards by entry id; incremental fetches
/// ask for everything after the newest stored id.
#[derive(Debug, Clone)]
pub struct MinifluxBackend {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct MinifluxFeed {
    id: i64,
    title: String,
    feed_url: String,
    #[serde(default)]
    site_url: String,
}

impl From<MinifluxFeed> for Feed {
    fn from(feed: MinifluxFeed) -> Self {
        let mut links = vec![Link::new("self", feed.feed_url)];
        if !feed.site_url.is_empty() {
            links.push(Link::new("alternate", feed.site_url));
        }
        Feed::new(feed.id.to_string(), feed.title, links)
    }
}

#[derive(Debug, Deserialize)]
struct MinifluxCategory {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct MinifluxEnclosure {
    url: String,
    #[serde(default)]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct MinifluxEntry {
    id: i64,
    feed_id: i64,
    status: String,
    title: String,
    #[serde(default)]
    url: String,
    published_at: Option<DateTime<Utc>>,
    changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    author: String,
    #[serde(default)]
    content: String,
    starred: bool,
    #[serde(default)]
    enclosures: Option<Vec<MinifluxEnclosure>>,
}

impl From<MinifluxEntry> for RemoteEntry {
    fn from(entry: MinifluxEntry) -> Self {
        let enclosure = entry
            .enclosures
            .and_then(|list| list.into_iter().next())
            .map(|enclosure| Enclosure {
                url: enclosure.url,
                media_type: enclosure.mime_type,
            });
        RemoteEntry {
            content: EntryContent {
                id: entry.id.to_string(),
                feed_id: entry.feed_id.to_string(),
                title: entry.title,
                link: Some(entry.url).filter(|url| !url.is_empty()),
                published: entry.published_at,
                updated: entry.changed_at.or(entry.published_at),
                author_name: Some(entry.author).filter(|author| !author.is_empty()),
                content_html: Some(entry.content).filter(|content| !content.is_empty()),
                enclosure,
                guid_hash: None,
            },
            read: Some(entry.status == "read"),
            bookmarked: Some(entry.starred),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EntriesPage {
    entries: Vec<MinifluxEntry>,
}

#[derive(Debug, Deserialize)]
struct CreatedFeed {
    feed_id: i64,
}

#[derive(Debug, Serialize)]
struct CreateFeedRequest<'a> {
    feed_url: &'a str,
    category_id: i64,
}

#[derive(Debug, Serialize)]
struct UpdateFeedRequest<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateEntriesRequest {
    entry_ids: Vec<i64>,
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_message: String,
}

fn parse_id(id: &str) -> Result<i64, BackendError> {
    id.parse::<i64>()
        .map_err(|_| BackendError::Parse(format!("not a Miniflux id: {id}")))
}

impl MinifluxBackend {
    pub fn new(
        client: Client,
        base_url: &str,
        username: &str,
        password: &str,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            username: username.to_owned(),
            password: password.to_owned(),
            batch_size: batch_size.max(1),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/v1{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn entries(&self, query: &[(&str, String)]) -> Result<Vec<MinifluxEntry>, BackendError> {
        let response = self
            .request(reqwest::Method::GET, "/entries")
            .query(query)
            .send()
            .await?;
        let page: EntriesPage = check_status(response).await?.json().await?;
        Ok(page.entries)
    }

    async fn entry(&self, id: i64) -> Result<MinifluxEntry, BackendError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/entries/{id}"))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(format!("entry {id}")));
        }
        Ok(check_status(response).await?.json().await?)
    }

    async fn default_category(&self) -> Result<i64, BackendError> {
        let response = self
            .request(reqwest::Method::GET, "/categories")
            .send()
            .await?;
        let categories: Vec<MinifluxCategory> = check_status(response).await?.json().await?;
        categories
            .first()
            .map(|category| category.id)
            .ok_or_else(|| BackendError::Parse("server has no categories".into()))
    }

    async fn feed(&self, id: i64) -> Result<Feed, BackendError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/feeds/{id}"))
            .send()
            .await?;
        let feed: MinifluxFeed = check_status(response).await?.json().await?;
        Ok(feed.into())
    }
}

#[async_trait]
impl Backend for MinifluxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Miniflux
    }

    fn cursor_kind(&self) -> CursorKind {
        CursorKind::EntryId
    }

    async fn add_feed(&self, url: &str) -> Result<Feed, BackendError> {
        let category_id = self.default_category().await?;
        let response = self
            .request(reqwest::Method::POST, "/feeds")
            .json(&CreateFeedRequest {
                feed_url: url,
                category_id,
            })
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.error_message)
                .unwrap_or_default();
            return Err(if message.to_lowercase().contains("already exists") {
                BackendError::Duplicate(url.to_owned())
            } else {
                BackendError::InvalidFeed(url.to_owned())
            });
        }

        let created: CreatedFeed = check_status(response).await?.json().await?;
        self.feed(created.feed_id).await
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>, BackendError> {
        let response = self.request(reqwest::Method::GET, "/feeds").send().await?;
        let feeds: Vec<MinifluxFeed> = check_status(response).await?.json().await?;
        Ok(feeds.into_iter().map(Feed::from).collect())
    }

    async fn rename_feed(&self, id: &str, title: &str) -> Result<(), BackendError> {
        let response = self
            .request(reqwest::Method::PUT, &format!("/feeds/{}", parse_id(id)?))
            .json(&UpdateFeedRequest { title })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete_feed(&self, id: &str) -> Result<(), BackendError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/feeds/{}", parse_id(id)?))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    fn fetch_all_entries(&self, include_read: bool) -> EntryBatches<'_> {
        let this = self;
        // State: `Some(before_entry_id)` while pages remain.
        stream::try_unfold(Some(None::<i64>), move |next| async move {
            let Some(before) = next else {
                return Ok(None);
            };
            let mut query = vec![
                ("order", "id".to_string()),
                ("direction", "desc".to_string()),
                ("limit", this.batch_size.to_string()),
            ];
            if let Some(before) = before {
                query.push(("before_entry_id", before.to_string()));
            }
            if !include_read {
                query.push(("status", "unread".to_string()));
            }

            let page = this.entries(&query).await?;
            debug!(before = ?before, count = page.len(), "fetched Miniflux page");
            let next = match page.iter().map(|entry| entry.id).min() {
                Some(min) if page.len() >= this.batch_size => Some(Some(min)),
                _ => None,
            };
            let batch: Vec<RemoteEntry> = page.into_iter().map(RemoteEntry::from).collect();
            Ok(Some((batch, next)))
        })
        .boxed()
    }

    async fn fetch_incremental(
        &self,
        cursor: &IncrementalCursor,
    ) -> Result<Vec<RemoteEntry>, BackendError> {
        let mut query = vec![
            ("order", "id".to_string()),
            ("direction", "asc".to_string()),
            // 0 lifts the server's default page size.
            ("limit", "0".to_string()),
        ];
        if let Some(after) = cursor.max_entry_id {
            query.push(("after_entry_id", after.to_string()));
        }
        let entries = self.entries(&query).await?;
        Ok(entries.into_iter().map(RemoteEntry::from).collect())
    }

    async fn push_read_flags(&self, ids: &[String], read: bool) -> Result<(), BackendError> {
        let entry_ids = ids
            .iter()
            .map(|id| parse_id(id))
            .collect::<Result<Vec<_>, _>>()?;
        let response = self
            .request(reqwest::Method::PUT, "/entries")
            .json(&UpdateEntriesRequest {
                entry_ids,
                status: if read { "read" } else { "unread" },
            })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Miniflux only exposes a bookmark toggle, so each entry is toggled only
    /// when its remote state differs from `bookmarked`.
    async fn push_bookmark_flags(
        &self,
        entries: &[Entry],
        bookmarked: bool,
    ) -> Result<(), BackendError> {
        for entry in entries {
            let id = parse_id(entry.id())?;
            if self.entry(id).await?.starred == bookmarked {
                continue;
            }
            let response = self
                .request(reqwest::Method::PUT, &format!("/entries/{id}/bookmark"))
                .send()
                .await?;
            check_status(response).await?;
        }
        Ok(())
    }
}
