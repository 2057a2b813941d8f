use async_trait::async_trait;
use chrono::DateTime;
use futures_util::stream::{self, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_status, Backend, BackendKind, CursorKind, EntryBatches, IncrementalCursor};
use crate::error::BackendError;
use crate::feed::{Enclosure, Entry, EntryContent, Feed, Link, RemoteEntry};

const API_PATH: &str = "/index.php/apps/news/api/v1-3";
/// `type=3` selects every item regardless of feed or folder.
const ALL_ITEMS: &str = "3";

/// Nextcloud News API. Snapshot pages are offset by the smallest item id seen
/// so far; incremental fetches use the last sync timestamp.
#[derive(Debug, Clone)]
pub struct NextcloudBackend {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct FeedsResponse {
    feeds: Vec<NextcloudFeed>,
}

#[derive(Debug, Deserialize)]
struct NextcloudFeed {
    id: i64,
    url: String,
    title: String,
    #[serde(default)]
    link: Option<String>,
}

impl From<NextcloudFeed> for Feed {
    fn from(feed: NextcloudFeed) -> Self {
        let mut links = vec![Link::new("self", feed.url)];
        if let Some(link) = feed.link.filter(|link| !link.is_empty()) {
            links.push(Link::new("alternate", link));
        }
        Feed::new(feed.id.to_string(), feed.title, links)
    }
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    items: Vec<NextcloudItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextcloudItem {
    id: i64,
    guid_hash: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    pub_date: Option<i64>,
    #[serde(default)]
    updated_date: Option<i64>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    enclosure_mime: Option<String>,
    #[serde(default)]
    enclosure_link: Option<String>,
    feed_id: i64,
    unread: bool,
    starred: bool,
}

impl From<NextcloudItem> for RemoteEntry {
    fn from(item: NextcloudItem) -> Self {
        let published = item.pub_date.and_then(|secs| DateTime::from_timestamp(secs, 0));
        let updated = item
            .updated_date
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or(published);
        let enclosure = item
            .enclosure_link
            .filter(|link| !link.is_empty())
            .map(|url| Enclosure {
                url,
                media_type: item.enclosure_mime.unwrap_or_default(),
            });
        RemoteEntry {
            content: EntryContent {
                id: item.id.to_string(),
                feed_id: item.feed_id.to_string(),
                title: item.title.unwrap_or_default(),
                link: item.url,
                published,
                updated,
                author_name: item.author.filter(|author| !author.is_empty()),
                content_html: item.body,
                enclosure,
                guid_hash: Some(item.guid_hash),
            },
            read: Some(!item.unread),
            bookmarked: Some(item.starred),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateFeedRequest<'a> {
    url: &'a str,
    folder_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenameFeedRequest<'a> {
    feed_title: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemIdsRequest {
    item_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StarredItem {
    feed_id: i64,
    guid_hash: String,
}

#[derive(Debug, Serialize)]
struct StarredItemsRequest {
    items: Vec<StarredItem>,
}

fn parse_id(id: &str) -> Result<i64, BackendError> {
    id.parse::<i64>()
        .map_err(|_| BackendError::Parse(format!("not a Nextcloud News id: {id}")))
}

impl NextcloudBackend {
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
            .request(method, format!("{}{}{}", self.base_url, API_PATH, path))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn items(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<NextcloudItem>, BackendError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .query(query)
            .send()
            .await?;
        let items: ItemsResponse = check_status(response).await?.json().await?;
        Ok(items.items)
    }
}

#[async_trait]
impl Backend for NextcloudBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Nextcloud
    }

    fn cursor_kind(&self) -> CursorKind {
        CursorKind::Timestamp
    }

    async fn add_feed(&self, url: &str) -> Result<Feed, BackendError> {
        let response = self
            .request(reqwest::Method::POST, "/feeds")
            .json(&CreateFeedRequest { url, folder_id: 0 })
            .send()
            .await?;
        match response.status() {
            reqwest::StatusCode::CONFLICT => return Err(BackendError::Duplicate(url.to_owned())),
            reqwest::StatusCode::UNPROCESSABLE_ENTITY => {
                return Err(BackendError::InvalidFeed(url.to_owned()))
            }
            _ => {}
        }
        let created: FeedsResponse = check_status(response).await?.json().await?;
        created
            .feeds
            .into_iter()
            .next()
            .map(Feed::from)
            .ok_or_else(|| BackendError::Parse("feed creation returned no feed".into()))
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>, BackendError> {
        let response = self.request(reqwest::Method::GET, "/feeds").send().await?;
        let feeds: FeedsResponse = check_status(response).await?.json().await?;
        Ok(feeds.feeds.into_iter().map(Feed::from).collect())
    }

    async fn rename_feed(&self, id: &str, title: &str) -> Result<(), BackendError> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/feeds/{}/rename", parse_id(id)?),
            )
            .json(&RenameFeedRequest { feed_title: title })
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
        // State: `Some(offset)` while pages remain; offset 0 starts at the newest item.
        stream::try_unfold(Some(0_i64), move |next| async move {
            let Some(offset) = next else {
                return Ok(None);
            };
            let query = [
                ("type", ALL_ITEMS.to_string()),
                ("id", "0".to_string()),
                ("batchSize", this.batch_size.to_string()),
                ("offset", offset.to_string()),
                ("getRead", include_read.to_string()),
                ("oldestFirst", "false".to_string()),
            ];
            let page = this.items("/items", &query).await?;
            debug!(offset, count = page.len(), "fetched Nextcloud News page");
            let next = match page.iter().map(|item| item.id).min() {
                Some(min) if page.len() >= this.batch_size => Some(min),
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
        let last_modified = cursor.last_sync.map_or(0, |at| at.timestamp());
        let query = [
            ("type", ALL_ITEMS.to_string()),
            ("id", "0".to_string()),
            ("lastModified", last_modified.to_string()),
        ];
        let items = self.items("/items/updated", &query).await?;
        Ok(items.into_iter().map(RemoteEntry::from).collect())
    }

    async fn push_read_flags(&self, ids: &[String], read: bool) -> Result<(), BackendError> {
        let item_ids = ids
            .iter()
            .map(|id| parse_id(id))
            .collect::<Result<Vec<_>, _>>()?;
        let path = if read {
            "/items/read/multiple"
        } else {
            "/items/unread/multiple"
        };
        let response = self
            .request(reqwest::Method::POST, path)
            .json(&ItemIdsRequest { item_ids })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn push_bookmark_flags(
        &self,
        entries: &[Entry],
        bookmarked: bool,
    ) -> Result<(), BackendError> {
        let items = entries
            .iter()
            .map(|entry| {
                let guid_hash = entry.content.guid_hash.clone().ok_or_else(|| {
                    BackendError::Parse(format!("entry {} has no guid hash", entry.id()))
                })?;
                Ok(StarredItem {
                    feed_id: parse_id(entry.feed_id())?,
                    guid_hash,
                })
            })
            .collect::<Result<Vec<_>, BackendError>>()?;
        let path = if bookmarked {
            "/items/star/multiple"
        } else {
            "/items/unstar/multiple"
        };
        let response = self
            .request(reqwest::Method::POST, path)
            .json(&StarredItemsRequest { items })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
