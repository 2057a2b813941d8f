use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::feed::{Entry, Feed, RemoteEntry};

/// Sync cursor and first-run marker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SyncConf {
    pub last_entries_sync: Option<DateTime<Utc>>,
    pub initial_sync_completed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedListChanges {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Entries deleted along with removed feeds.
    pub removed_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoreData {
    feeds: BTreeMap<String, Feed>,
    entries: BTreeMap<String, Entry>,
    conf: SyncConf,
}

impl StoreData {
    fn remove_entries_of(&mut self, feed_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.feed_id() != feed_id);
        before - self.entries.len()
    }

    fn prune_orphans(&mut self) -> usize {
        let before = self.entries.len();
        let feeds = &self.feeds;
        self.entries
            .retain(|_, entry| feeds.contains_key(entry.feed_id()));
        before - self.entries.len()
    }
}

/// Local cache of feeds, entries and the sync cursor.
///
/// Every mutation runs against a copy of the current state, is persisted, and
/// only then replaces the shared state, so readers never see a half-applied batch.
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<RwLock<StoreData>>,
    path: Option<PathBuf>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreData::default())),
            path: None,
        }
    }

    /// Loads the store from `path`, falling back to the temp file left by an
    /// interrupted write when the main file is corrupted.
    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %e, "failed to create store dir");
            }
        }
        let data: StoreData = read_json_with_tmp_fallback(&path).await;
        debug!(
            feeds = data.feeds.len(),
            entries = data.entries.len(),
            "store loaded"
        );
        Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path),
        }
    }

    async fn transaction<T>(
        &self,
        apply: impl FnOnce(&mut StoreData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.inner.write().await;
        let mut next = guard.clone();
        let out = apply(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    async fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(data)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Atomic replace so a crash never leaves a truncated store.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub async fn feeds(&self) -> Vec<Feed> {
        self.inner.read().await.feeds.values().cloned().collect()
    }

    pub async fn feed(&self, id: &str) -> Option<Feed> {
        self.inner.read().await.feeds.get(id).cloned()
    }

    pub async fn insert_feed(&self, feed: Feed) -> Result<(), StoreError> {
        self.transaction(|data| {
            if data.feeds.contains_key(&feed.id) {
                return Err(StoreError::DuplicateFeed(feed.id));
            }
            data.feeds.insert(feed.id.clone(), feed);
            Ok(())
        })
        .await
    }

    /// Replaces a stored feed, e.g. after the user edited its overrides.
    pub async fn update_feed(&self, feed: Feed) -> Result<(), StoreError> {
        self.transaction(|data| match data.feeds.get_mut(&feed.id) {
            Some(slot) => {
                *slot = feed;
                Ok(())
            }
            None => Err(StoreError::FeedNotFound(feed.id)),
        })
        .await
    }

    pub async fn rename_feed(&self, id: &str, title: &str) -> Result<(), StoreError> {
        self.transaction(|data| match data.feeds.get_mut(id) {
            Some(feed) => {
                feed.title = title.to_owned();
                Ok(())
            }
            None => Err(StoreError::FeedNotFound(id.to_owned())),
        })
        .await
    }

    /// Deletes a feed together with all of its entries. Returns the number of
    /// entries removed.
    pub async fn delete_feed(&self, id: &str) -> Result<usize, StoreError> {
        self.transaction(|data| {
            if data.feeds.remove(id).is_none() {
                return Err(StoreError::FeedNotFound(id.to_owned()));
            }
            Ok(data.remove_entries_of(id))
        })
        .await
    }

    /// Makes the stored feed list match `remote`, keeping the local overrides
    /// of feeds that survive. Entries of removed feeds go with them.
    pub async fn replace_feeds(&self, remote: Vec<Feed>) -> Result<FeedListChanges, StoreError> {
        self.transaction(|data| {
            let mut changes = FeedListChanges::default();
            let remote_ids: HashSet<String> = remote.iter().map(|f| f.id.clone()).collect();

            let stale: Vec<String> = data
                .feeds
                .keys()
                .filter(|id| !remote_ids.contains(*id))
                .cloned()
                .collect();
            for id in stale {
                data.feeds.remove(&id);
                changes.removed += 1;
                changes.removed_entries += data.remove_entries_of(&id);
            }

            for feed in remote {
                match data.feeds.get_mut(&feed.id) {
                    Some(local) => {
                        let merged = feed.with_overrides_from(local);
                        if *local != merged {
                            *local = merged;
                            changes.updated += 1;
                        }
                    }
                    None => {
                        data.feeds.insert(feed.id.clone(), feed);
                        changes.added += 1;
                    }
                }
            }

            Ok(changes)
        })
        .await
    }

    /// Deletes entries whose feed is no longer stored.
    pub async fn prune_orphans(&self) -> Result<usize, StoreError> {
        self.transaction(|data| Ok(data.prune_orphans())).await
    }

    pub async fn entries(&self) -> Vec<Entry> {
        self.inner.read().await.entries.values().cloned().collect()
    }

    pub async fn entry(&self, id: &str) -> Option<Entry> {
        self.inner.read().await.entries.get(id).cloned()
    }

    /// Entries of one feed, newest first.
    pub async fn entries_by_feed(&self, feed_id: &str) -> Vec<Entry> {
        let inner = self.inner.read().await;
        let mut entries: Vec<Entry> = inner
            .entries
            .values()
            .filter(|entry| entry.feed_id() == feed_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.content.published.cmp(&a.content.published));
        entries
    }

    pub async fn entry_count(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Largest numeric entry id, for backends that resume from an entry id.
    pub async fn max_entry_id(&self) -> Option<i64> {
        self.inner
            .read()
            .await
            .entries
            .keys()
            .filter_map(|id| id.parse::<i64>().ok())
            .max()
    }

    /// Inserts or overwrites entries by id. Returns how many records were
    /// inserted or actually changed.
    pub async fn upsert_entries(&self, remote: Vec<RemoteEntry>) -> Result<usize, StoreError> {
        if remote.is_empty() {
            return Ok(0);
        }
        self.transaction(|data| {
            let mut changed = 0;
            for incoming in remote {
                match data.entries.get_mut(incoming.id()) {
                    Some(local) => {
                        let before = local.clone();
                        local.merge_remote(incoming);
                        if *local != before {
                            changed += 1;
                        }
                    }
                    None => {
                        let entry = Entry::from_remote(incoming);
                        data.entries.insert(entry.id().to_owned(), entry);
                        changed += 1;
                    }
                }
            }
            Ok(changed)
        })
        .await
    }

    /// Local read toggle. Marks the read flag dirty when the value changes.
    pub async fn set_read(&self, id: &str, read: bool) -> Result<(), StoreError> {
        self.transaction(|data| {
            let entry = data
                .entries
                .get_mut(id)
                .ok_or_else(|| StoreError::EntryNotFound(id.to_owned()))?;
            if entry.read != read {
                entry.read = read;
                entry.read_synced = false;
            }
            Ok(())
        })
        .await
    }

    /// Local bookmark toggle. Marks the bookmark flag dirty when the value changes.
    pub async fn set_bookmarked(&self, id: &str, bookmarked: bool) -> Result<(), StoreError> {
        self.transaction(|data| {
            let entry = data
                .entries
                .get_mut(id)
                .ok_or_else(|| StoreError::EntryNotFound(id.to_owned()))?;
            if entry.bookmarked != bookmarked {
                entry.bookmarked = bookmarked;
                entry.bookmarked_synced = false;
            }
            Ok(())
        })
        .await
    }

    pub async fn dirty_read(&self) -> Vec<Entry> {
        let inner = self.inner.read().await;
        inner
            .entries
            .values()
            .filter(|entry| !entry.read_synced)
            .cloned()
            .collect()
    }

    pub async fn dirty_bookmarked(&self) -> Vec<Entry> {
        let inner = self.inner.read().await;
        inner
            .entries
            .values()
            .filter(|entry| !entry.bookmarked_synced)
            .cloned()
            .collect()
    }

    /// Marks the read flag synced for entries that still hold the pushed value.
    /// Entries toggled again since the push stay dirty.
    pub async fn mark_read_synced(&self, ids: &[String], read: bool) -> Result<usize, StoreError> {
        self.transaction(|data| {
            let mut marked = 0;
            for id in ids {
                if let Some(entry) = data.entries.get_mut(id) {
                    if entry.read == read && !entry.read_synced {
                        entry.read_synced = true;
                        marked += 1;
                    }
                }
            }
            Ok(marked)
        })
        .await
    }

    /// Bookmark counterpart of [`Store::mark_read_synced`].
    pub async fn mark_bookmarked_synced(
        &self,
        ids: &[String],
        bookmarked: bool,
    ) -> Result<usize, StoreError> {
        self.transaction(|data| {
            let mut marked = 0;
            for id in ids {
                if let Some(entry) = data.entries.get_mut(id) {
                    if entry.bookmarked == bookmarked && !entry.bookmarked_synced {
                        entry.bookmarked_synced = true;
                        marked += 1;
                    }
                }
            }
            Ok(marked)
        })
        .await
    }

    pub async fn conf(&self) -> SyncConf {
        self.inner.read().await.conf
    }

    /// Moves the cursor forward. An older timestamp leaves it untouched.
    pub async fn advance_cursor(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        self.transaction(|data| {
            let next = match data.conf.last_entries_sync {
                Some(current) if current >= at => current,
                _ => at,
            };
            data.conf.last_entries_sync = Some(next);
            Ok(next)
        })
        .await
    }

    pub async fn complete_initial_sync(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.transaction(|data| {
            data.conf.initial_sync_completed = true;
            if data.conf.last_entries_sync.map_or(true, |current| current < at) {
                data.conf.last_entries_sync = Some(at);
            }
            Ok(())
        })
        .await
    }

    /// Drops every feed, entry and cursor. Used when switching backends.
    pub async fn reset_sync_state(&self) -> Result<(), StoreError> {
        self.transaction(|data| {
            *data = StoreData::default();
            Ok(())
        })
        .await
    }
}

async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to parse JSON, trying tmp fallback");
                let tmp = path.with_extension("json.tmp");
                match tokio::fs::read(&tmp).await {
                    Ok(tmp_bytes) => serde_json::from_slice::<T>(&tmp_bytes).unwrap_or_default(),
                    Err(_) => Default::default(),
                }
            }
        },
        Err(_) => Default::default(),
    }
}
