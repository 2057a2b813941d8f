//! Remote backends the local cache synchronizes against.
//!
//! Each adapter owns its pagination and cursor handling. The sync engine only
//! sees two fetch shapes: a paged full snapshot and an incremental delta.

mod miniflux;
mod nextcloud;
pub mod parse;
mod standalone;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use reqwest::{Client, Response};

use crate::config::{BackendConfig, SyncConfig};
use crate::error::BackendError;
use crate::feed::{Entry, Feed, RemoteEntry};
use crate::storage::Store;

pub use miniflux::MinifluxBackend;
pub use nextcloud::NextcloudBackend;
pub use standalone::StandaloneBackend;

/// Lazily fetched batches of entries. Ends after the backend reports a short page.
pub type EntryBatches<'a> = BoxStream<'a, Result<Vec<RemoteEntry>, BackendError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Standalone,
    Miniflux,
    Nextcloud,
}

/// What an adapter resumes incremental fetches from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    /// Re-fetches everything; relies on idempotent upserts.
    None,
    /// Largest entry id already stored.
    EntryId,
    /// Time of the last successful entry sync.
    Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncrementalCursor {
    pub max_entry_id: Option<i64>,
    pub last_sync: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn cursor_kind(&self) -> CursorKind;

    /// Resolves `url` (a feed, or for some backends a page linking to one) to a feed.
    async fn add_feed(&self, url: &str) -> Result<Feed, BackendError>;

    async fn list_feeds(&self) -> Result<Vec<Feed>, BackendError>;

    async fn rename_feed(&self, id: &str, title: &str) -> Result<(), BackendError>;

    async fn delete_feed(&self, id: &str) -> Result<(), BackendError>;

    fn fetch_all_entries(&self, include_read: bool) -> EntryBatches<'_>;

    /// Entries created or modified after `cursor`.
    async fn fetch_incremental(
        &self,
        cursor: &IncrementalCursor,
    ) -> Result<Vec<RemoteEntry>, BackendError>;

    /// Idempotent: pushing the same ids and value twice has the effect of once.
    async fn push_read_flags(&self, ids: &[String], read: bool) -> Result<(), BackendError>;

    async fn push_bookmark_flags(
        &self,
        entries: &[Entry],
        bookmarked: bool,
    ) -> Result<(), BackendError>;
}

/// Builds the adapter selected by `config`.
pub fn build_backend(
    config: &BackendConfig,
    sync: &SyncConfig,
    client: Client,
    store: Store,
) -> Arc<dyn Backend> {
    match config {
        BackendConfig::Standalone => Arc::new(StandaloneBackend::new(client, store)),
        BackendConfig::Miniflux {
            url,
            username,
            password,
        } => Arc::new(MinifluxBackend::new(
            client,
            url,
            username,
            password,
            sync.batch_size,
        )),
        BackendConfig::Nextcloud {
            url,
            username,
            password,
        } => Arc::new(NextcloudBackend::new(
            client,
            url,
            username,
            password,
            sync.batch_size,
        )),
    }
}

/// Maps non-success responses onto backend errors.
pub(crate) async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(BackendError::Auth);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}
