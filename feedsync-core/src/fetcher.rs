//! Pulls entries from the backend into the local store.

use chrono::Utc;
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::backend::{Backend, CursorKind, IncrementalCursor};
use crate::error::{BackendError, StoreError};
use crate::storage::Store;

#[derive(Debug)]
pub enum FetchError {
    Backend(BackendError),
    Store(StoreError),
}

impl From<BackendError> for FetchError {
    fn from(err: BackendError) -> Self {
        FetchError::Backend(err)
    }
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        FetchError::Store(err)
    }
}

/// Builds the cursor shape the backend asks for from the local state.
pub async fn cursor_for(backend: &dyn Backend, store: &Store) -> IncrementalCursor {
    match backend.cursor_kind() {
        CursorKind::None => IncrementalCursor::default(),
        CursorKind::EntryId => IncrementalCursor {
            max_entry_id: store.max_entry_id().await,
            last_sync: None,
        },
        CursorKind::Timestamp => IncrementalCursor {
            max_entry_id: None,
            last_sync: store.conf().await.last_entries_sync,
        },
    }
}

/// Fetches entries changed since the cursor, upserts them, then advances the
/// cursor to the time the fetch started. Returns the number of entries
/// inserted or changed.
pub async fn sync_new_and_updated(backend: &dyn Backend, store: &Store) -> Result<usize, FetchError> {
    let cursor = cursor_for(backend, store).await;
    let started_at = Utc::now();
    debug!(?cursor, "fetching new and updated entries");

    let entries = backend.fetch_incremental(&cursor).await?;
    let fetched = entries.len();
    let changed = store.upsert_entries(entries).await?;
    let cursor = store.advance_cursor(started_at).await?;

    info!(fetched, changed, cursor = %cursor, "synced new and updated entries");
    Ok(changed)
}

/// Streams the full entry snapshot into the store, one transaction per batch.
/// `progress` receives the running total after every batch.
pub async fn fetch_snapshot(
    backend: &dyn Backend,
    store: &Store,
    include_read: bool,
    mut progress: impl FnMut(usize) + Send,
) -> Result<usize, FetchError> {
    let mut batches = backend.fetch_all_entries(include_read);
    let mut total = 0;
    while let Some(batch) = batches.next().await {
        let batch = batch?;
        total += batch.len();
        store.upsert_entries(batch).await?;
        progress(total);
    }
    info!(total, "fetched entry snapshot");
    Ok(total)
}
