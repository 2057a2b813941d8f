//! Pushes locally edited read/bookmark flags to the backend.

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{FlagSyncFailure, StoreError};
use crate::feed::Entry;
use crate::storage::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagReport {
    pub read_pushed: usize,
    pub bookmarks_pushed: usize,
}

#[derive(Debug)]
pub enum ReconcileError {
    Store(StoreError),
    /// At least one push failed. The report counts what did get through.
    Push(FlagSyncFailure, FlagReport),
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        ReconcileError::Store(err)
    }
}

/// Pushes every dirty flag, one batch call per group (read, unread,
/// bookmarked, unbookmarked).
///
/// The two dimensions are independent: a failed read push does not stop the
/// bookmark push. A failed group stays dirty for the next attempt.
pub async fn sync_flags(backend: &dyn Backend, store: &Store) -> Result<FlagReport, ReconcileError> {
    let mut report = FlagReport::default();
    let mut failure = FlagSyncFailure::default();

    let (read, unread): (Vec<Entry>, Vec<Entry>) =
        store.dirty_read().await.into_iter().partition(|e| e.read);
    for (group, value) in [(read, true), (unread, false)] {
        if group.is_empty() {
            continue;
        }
        let ids = ids_of(&group);
        debug!(count = ids.len(), read = value, "pushing read flags");
        match backend.push_read_flags(&ids, value).await {
            Ok(()) => report.read_pushed += store.mark_read_synced(&ids, value).await?,
            Err(err) => {
                warn!(error = %err, count = ids.len(), read = value, "failed to push read flags");
                if failure.read.is_none() {
                    failure.read = Some(err);
                }
            }
        }
    }

    let (bookmarked, unbookmarked): (Vec<Entry>, Vec<Entry>) = store
        .dirty_bookmarked()
        .await
        .into_iter()
        .partition(|e| e.bookmarked);
    for (group, value) in [(bookmarked, true), (unbookmarked, false)] {
        if group.is_empty() {
            continue;
        }
        let ids = ids_of(&group);
        debug!(count = ids.len(), bookmarked = value, "pushing bookmark flags");
        match backend.push_bookmark_flags(&group, value).await {
            Ok(()) => {
                report.bookmarks_pushed += store.mark_bookmarked_synced(&ids, value).await?
            }
            Err(err) => {
                warn!(error = %err, count = ids.len(), bookmarked = value, "failed to push bookmark flags");
                if failure.bookmarked.is_none() {
                    failure.bookmarked = Some(err);
                }
            }
        }
    }

    if failure.read.is_some() || failure.bookmarked.is_some() {
        return Err(ReconcileError::Push(failure, report));
    }
    if report.read_pushed + report.bookmarks_pushed > 0 {
        info!(
            read = report.read_pushed,
            bookmarks = report.bookmarks_pushed,
            "pushed local flags"
        );
    }
    Ok(report)
}

fn ids_of(group: &[Entry]) -> Vec<String> {
    group.iter().map(|e| e.id().to_owned()).collect()
}
