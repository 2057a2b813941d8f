use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use tracing::{debug, info, warn};

use super::parse::{parse_document, Document, ParsedFeed};
use super::{check_status, Backend, BackendKind, CursorKind, EntryBatches, IncrementalCursor};
use crate::error::BackendError;
use crate::feed::{Entry, Feed, RemoteEntry};
use crate::storage::Store;

/// Parse-only backend: fetches every feed document directly. Subscriptions and
/// flags live only in the local store, so flag pushes always succeed.
#[derive(Debug, Clone)]
pub struct StandaloneBackend {
    client: Client,
    store: Store,
}

struct SnapshotState {
    pending: VecDeque<Feed>,
    attempted: usize,
    failed: usize,
    last_error: Option<BackendError>,
}

impl StandaloneBackend {
    pub fn new(client: Client, store: Store) -> Self {
        Self { client, store }
    }

    async fn fetch_document(&self, url: &str) -> Result<Document, BackendError> {
        let response = self.client.get(url).send().await?;
        let bytes = check_status(response).await?.bytes().await?;
        parse_document(url, &bytes)
    }

    async fn fetch_feed(&self, url: &str) -> Result<ParsedFeed, BackendError> {
        match self.fetch_document(url).await? {
            Document::Feed(parsed) => Ok(parsed),
            Document::Html(_) => Err(BackendError::InvalidFeed(url.to_owned())),
        }
    }

    /// Fetches every stored feed, skipping the ones that fail. Fails only when
    /// all of them fail.
    async fn fetch_every_feed(&self) -> Result<Vec<RemoteEntry>, BackendError> {
        let feeds = self.store.feeds().await;
        let mut entries = Vec::new();
        let mut last_error = None;
        let mut failed = 0;
        for feed in &feeds {
            match self.fetch_feed(&feed.id).await {
                Ok(parsed) => entries.extend(parsed.entries),
                Err(err) => {
                    warn!(feed = %feed.id, error = %err, "failed to fetch feed");
                    failed += 1;
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) if failed == feeds.len() => Err(err),
            _ => Ok(entries),
        }
    }
}

#[async_trait]
impl Backend for StandaloneBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Standalone
    }

    fn cursor_kind(&self) -> CursorKind {
        CursorKind::None
    }

    async fn add_feed(&self, url: &str) -> Result<Feed, BackendError> {
        if self.store.feed(url).await.is_some() {
            return Err(BackendError::Duplicate(url.to_owned()));
        }
        match self.fetch_document(url).await? {
            Document::Feed(parsed) => Ok(parsed.feed),
            Document::Html(candidates) => {
                debug!(page = %url, candidates = candidates.len(), "discovered feed links");
                for candidate in candidates {
                    if self.store.feed(&candidate).await.is_some() {
                        return Err(BackendError::Duplicate(candidate));
                    }
                    match self.fetch_feed(&candidate).await {
                        Ok(parsed) => {
                            info!(page = %url, feed = %candidate, "resolved feed from page");
                            return Ok(parsed.feed);
                        }
                        Err(err) => warn!(feed = %candidate, error = %err, "candidate is not a feed"),
                    }
                }
                Err(BackendError::InvalidFeed(url.to_owned()))
            }
        }
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>, BackendError> {
        let mut feeds = Vec::new();
        for local in self.store.feeds().await {
            match self.fetch_feed(&local.id).await {
                Ok(parsed) => feeds.push(parsed.feed.with_overrides_from(&local)),
                Err(err) => {
                    warn!(feed = %local.id, error = %err, "keeping stored feed metadata");
                    feeds.push(local);
                }
            }
        }
        Ok(feeds)
    }

    async fn rename_feed(&self, _id: &str, _title: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn delete_feed(&self, _id: &str) -> Result<(), BackendError> {
        Ok(())
    }

    fn fetch_all_entries(&self, _include_read: bool) -> EntryBatches<'_> {
        let this = self;
        let init = async move {
            let pending: VecDeque<Feed> = this.store.feeds().await.into_iter().collect();
            SnapshotState {
                pending,
                attempted: 0,
                failed: 0,
                last_error: None,
            }
        };

        stream::once(init)
            .flat_map(move |state| {
                stream::try_unfold(state, move |mut state| async move {
                    while let Some(feed) = state.pending.pop_front() {
                        state.attempted += 1;
                        match this.fetch_feed(&feed.id).await {
                            Ok(parsed) => return Ok(Some((parsed.entries, state))),
                            Err(err) => {
                                warn!(feed = %feed.id, error = %err, "failed to fetch feed");
                                state.failed += 1;
                                state.last_error = Some(err);
                            }
                        }
                    }
                    match state.last_error.take() {
                        Some(err) if state.failed == state.attempted => Err(err),
                        _ => Ok(None),
                    }
                })
            })
            .boxed()
    }

    async fn fetch_incremental(
        &self,
        _cursor: &IncrementalCursor,
    ) -> Result<Vec<RemoteEntry>, BackendError> {
        self.fetch_every_feed().await
    }

    async fn push_read_flags(&self, _ids: &[String], _read: bool) -> Result<(), BackendError> {
        Ok(())
    }

    async fn push_bookmark_flags(
        &self,
        _entries: &[Entry],
        _bookmarked: bool,
    ) -> Result<(), BackendError> {
        Ok(())
    }
}
