#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::Notify;

use feedsync_core::{
    Backend, BackendError, BackendKind, CursorKind, Entry, EntryBatches, EntryContent, Feed,
    IncrementalCursor, Link, RemoteEntry,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddFeed(String),
    ListFeeds,
    RenameFeed(String, String),
    DeleteFeed(String),
    FetchAll(bool),
    FetchIncremental(IncrementalCursor),
    PushRead(Vec<String>, bool),
    PushBookmarks(Vec<String>, bool),
}

/// Scriptable backend that records every call.
pub struct MockBackend {
    pub cursor_kind: CursorKind,
    pub feeds: Mutex<Vec<Feed>>,
    pub snapshot: Mutex<Vec<Vec<RemoteEntry>>>,
    pub incremental: Mutex<Vec<RemoteEntry>>,
    pub calls: Mutex<Vec<Call>>,
    pub fail_list_feeds: AtomicBool,
    pub fail_snapshot: AtomicBool,
    pub fail_incremental: AtomicBool,
    pub fail_read_push: AtomicBool,
    pub fail_bookmark_push: AtomicBool,
    /// When set, `list_feeds` signals `entered` and waits for `release`.
    pub block_list_feeds: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            cursor_kind: CursorKind::Timestamp,
            feeds: Mutex::new(Vec::new()),
            snapshot: Mutex::new(Vec::new()),
            incremental: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail_list_feeds: AtomicBool::new(false),
            fail_snapshot: AtomicBool::new(false),
            fail_incremental: AtomicBool::new(false),
            fail_read_push: AtomicBool::new(false),
            fail_bookmark_push: AtomicBool::new(false),
            block_list_feeds: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_cursor_kind(mut self, kind: CursorKind) -> Self {
        self.cursor_kind = kind;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn remote_failure() -> BackendError {
        BackendError::Status {
            status: 500,
            body: "boom".into(),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Miniflux
    }

    fn cursor_kind(&self) -> CursorKind {
        self.cursor_kind
    }

    async fn add_feed(&self, url: &str) -> Result<Feed, BackendError> {
        self.record(Call::AddFeed(url.to_owned()));
        Ok(feed(url))
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>, BackendError> {
        self.record(Call::ListFeeds);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.block_list_feeds.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_list_feeds.load(Ordering::SeqCst) {
            return Err(Self::remote_failure());
        }
        Ok(self.feeds.lock().unwrap().clone())
    }

    async fn rename_feed(&self, id: &str, title: &str) -> Result<(), BackendError> {
        self.record(Call::RenameFeed(id.to_owned(), title.to_owned()));
        Ok(())
    }

    async fn delete_feed(&self, id: &str) -> Result<(), BackendError> {
        self.record(Call::DeleteFeed(id.to_owned()));
        Ok(())
    }

    fn fetch_all_entries(&self, include_read: bool) -> EntryBatches<'_> {
        self.record(Call::FetchAll(include_read));
        if self.fail_snapshot.load(Ordering::SeqCst) {
            return stream::once(async { Err(Self::remote_failure()) }).boxed();
        }
        let batches = self.snapshot.lock().unwrap().clone();
        stream::iter(batches.into_iter().map(Ok)).boxed()
    }

    async fn fetch_incremental(
        &self,
        cursor: &IncrementalCursor,
    ) -> Result<Vec<RemoteEntry>, BackendError> {
        self.record(Call::FetchIncremental(cursor.clone()));
        if self.fail_incremental.load(Ordering::SeqCst) {
            return Err(Self::remote_failure());
        }
        Ok(self.incremental.lock().unwrap().clone())
    }

    async fn push_read_flags(&self, ids: &[String], read: bool) -> Result<(), BackendError> {
        self.record(Call::PushRead(ids.to_vec(), read));
        if self.fail_read_push.load(Ordering::SeqCst) {
            return Err(Self::remote_failure());
        }
        Ok(())
    }

    async fn push_bookmark_flags(
        &self,
        entries: &[Entry],
        bookmarked: bool,
    ) -> Result<(), BackendError> {
        let ids = entries.iter().map(|e| e.id().to_owned()).collect();
        self.record(Call::PushBookmarks(ids, bookmarked));
        if self.fail_bookmark_push.load(Ordering::SeqCst) {
            return Err(Self::remote_failure());
        }
        Ok(())
    }
}

pub fn feed(id: &str) -> Feed {
    Feed::new(id, format!("Feed {id}"), vec![Link::new("self", id)])
}

pub fn remote(id: &str, feed_id: &str, read: Option<bool>, bookmarked: Option<bool>) -> RemoteEntry {
    RemoteEntry {
        content: EntryContent {
            id: id.into(),
            feed_id: feed_id.into(),
            title: format!("Entry {id}"),
            link: Some(format!("http://example.com/{id}")),
            published: None,
            updated: None,
            author_name: None,
            content_html: None,
            enclosure: None,
            guid_hash: None,
        },
        read,
        bookmarked,
    }
}

pub fn temp_dir(prefix: &str) -> std::path::PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "{}_{}",
        prefix,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    dir
}
