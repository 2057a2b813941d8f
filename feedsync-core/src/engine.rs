//! Sync orchestration: sequences initial and follow-up syncs, one at a time.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use crate::backend::Backend;
use crate::connectivity::Connectivity;
use crate::error::{BackendError, StoreError, SyncError, SyncResult};
use crate::feed::Feed;
use crate::fetcher::{self, FetchError};
use crate::reconcile::{self, FlagReport, ReconcileError};
use crate::storage::{FeedListChanges, Store};

/// Which phases a follow-up sync runs. Phases always run flags, then feeds,
/// then entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncArgs {
    pub feeds: bool,
    pub flags: bool,
    pub entries: bool,
}

impl SyncArgs {
    pub fn all() -> Self {
        Self {
            feeds: true,
            flags: true,
            entries: true,
        }
    }

    pub fn flags_only() -> Self {
        Self {
            flags: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    InitialSync { message: String },
    FollowUpSync(SyncArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialSyncOutcome {
    /// Initial sync already happened on this installation.
    Skipped,
    Completed { feeds: usize, entries: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub flags: Option<FlagReport>,
    pub feeds: Option<FeedListChanges>,
    /// Entries inserted or changed by the entry phase.
    pub entries: Option<usize>,
}

/// Holds the sync mutex and resets the published status when dropped.
struct SyncSession<'a> {
    status: &'a watch::Sender<SyncStatus>,
    lock: Option<MutexGuard<'a, ()>>,
}

impl Drop for SyncSession<'_> {
    fn drop(&mut self) {
        // Unlock before announcing `Idle` so observers can start the next sync.
        drop(self.lock.take());
        self.status.send_replace(SyncStatus::Idle);
    }
}

/// Runs syncs against the current backend.
///
/// A sync requested while another one runs fails with
/// [`SyncError::AlreadySyncing`]; requests are never queued.
pub struct SyncEngine {
    store: Store,
    backend: RwLock<Arc<dyn Backend>>,
    connectivity: Arc<dyn Connectivity>,
    sync_lock: Mutex<()>,
    status: watch::Sender<SyncStatus>,
    include_read_on_initial_sync: bool,
}

impl SyncEngine {
    pub fn new(
        store: Store,
        backend: Arc<dyn Backend>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            store,
            backend: RwLock::new(backend),
            connectivity,
            sync_lock: Mutex::new(()),
            status,
            include_read_on_initial_sync: true,
        }
    }

    pub fn with_include_read_on_initial_sync(mut self, include_read: bool) -> Self {
        self.include_read_on_initial_sync = include_read;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Status changes, including initial sync progress messages.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub async fn backend(&self) -> Arc<dyn Backend> {
        self.backend.read().await.clone()
    }

    /// Replaces the backend. Waits for a running sync to finish, then drops all
    /// local data that belonged to the previous backend.
    pub async fn switch_backend(&self, backend: Arc<dyn Backend>) -> SyncResult<()> {
        let _lock = self.sync_lock.lock().await;
        self.store.reset_sync_state().await?;
        *self.backend.write().await = backend;
        info!("backend switched, local sync state reset");
        Ok(())
    }

    fn begin(&self, status: SyncStatus) -> SyncResult<SyncSession<'_>> {
        let lock = self
            .sync_lock
            .try_lock()
            .map_err(|_| SyncError::AlreadySyncing)?;
        self.status.send_replace(status);
        Ok(SyncSession {
            status: &self.status,
            lock: Some(lock),
        })
    }

    fn ensure_online(&self) -> SyncResult<()> {
        if self.connectivity.is_online() {
            Ok(())
        } else {
            Err(SyncError::Offline)
        }
    }

    /// Fetches the feed list and the full entry snapshot in parallel the first
    /// time it is called. Retried wholesale until it succeeds once.
    pub async fn perform_initial_sync_if_needed(&self) -> SyncResult<InitialSyncOutcome> {
        if self.store.conf().await.initial_sync_completed {
            return Ok(InitialSyncOutcome::Skipped);
        }
        let _session = self.begin(SyncStatus::InitialSync {
            message: "Fetching feeds and entries".into(),
        })?;
        // Another sync may have finished it while we were waiting to start.
        if self.store.conf().await.initial_sync_completed {
            return Ok(InitialSyncOutcome::Skipped);
        }
        self.ensure_online()?;

        let backend = self.backend().await;
        let started_at = Utc::now();
        info!(backend = ?backend.kind(), "starting initial sync");

        let feeds_task = async {
            let feeds = backend.list_feeds().await.map_err(SyncError::InitialSync)?;
            let count = feeds.len();
            self.store.replace_feeds(feeds).await?;
            Ok::<_, SyncError>(count)
        };
        let entries_task = async {
            fetcher::fetch_snapshot(
                backend.as_ref(),
                &self.store,
                self.include_read_on_initial_sync,
                |total| {
                    self.status.send_replace(SyncStatus::InitialSync {
                        message: format!("Fetched {total} entries"),
                    });
                },
            )
            .await
            .map_err(|err| fetch_error(err, SyncError::InitialSync))
        };

        let (feeds, entries) = match tokio::try_join!(feeds_task, entries_task) {
            Ok(counts) => counts,
            Err(err) => {
                warn!(error = %err, "initial sync failed");
                return Err(err);
            }
        };

        self.store.prune_orphans().await?;
        self.store.complete_initial_sync(started_at).await?;
        info!(feeds, entries, "initial sync completed");
        Ok(InitialSyncOutcome::Completed { feeds, entries })
    }

    pub async fn sync_flags_only(&self) -> SyncResult<FlagReport> {
        let report = self.sync(SyncArgs::flags_only()).await?;
        Ok(report.flags.unwrap_or_default())
    }

    /// Runs the requested phases in order: flags, feeds, entries. The first
    /// failing phase ends the sync; earlier phases stay committed.
    pub async fn sync(&self, args: SyncArgs) -> SyncResult<SyncReport> {
        let _session = self.begin(SyncStatus::FollowUpSync(args))?;
        self.ensure_online()?;

        let backend = self.backend().await;
        let mut report = SyncReport::default();
        info!(?args, backend = ?backend.kind(), "starting sync");

        if args.flags {
            report.flags = Some(self.sync_flags_phase(backend.as_ref()).await?);
        }
        if args.feeds {
            report.feeds = Some(self.sync_feeds_phase(backend.as_ref()).await?);
        }
        if args.entries {
            report.entries = Some(self.sync_entries_phase(backend.as_ref()).await?);
        }

        info!(?report, "sync finished");
        Ok(report)
    }

    async fn sync_flags_phase(&self, backend: &dyn Backend) -> SyncResult<FlagReport> {
        match reconcile::sync_flags(backend, &self.store).await {
            Ok(report) => Ok(report),
            Err(ReconcileError::Store(err)) => Err(err.into()),
            Err(ReconcileError::Push(failure, _)) => Err(SyncError::Flags(failure)),
        }
    }

    async fn sync_feeds_phase(&self, backend: &dyn Backend) -> SyncResult<FeedListChanges> {
        let feeds = backend.list_feeds().await.map_err(SyncError::Feeds)?;
        let changes = self.store.replace_feeds(feeds).await?;
        let pruned = self.store.prune_orphans().await?;
        info!(
            added = changes.added,
            updated = changes.updated,
            removed = changes.removed,
            pruned,
            "synced feeds"
        );
        Ok(changes)
    }

    async fn sync_entries_phase(&self, backend: &dyn Backend) -> SyncResult<usize> {
        if self.store.entry_count().await > 0 {
            return fetcher::sync_new_and_updated(backend, &self.store)
                .await
                .map_err(|err| fetch_error(err, SyncError::Entries));
        }

        // Nothing cached yet: an incremental delta has nothing to build on.
        info!("no cached entries, fetching full snapshot");
        let started_at = Utc::now();
        let total = fetcher::fetch_snapshot(
            backend,
            &self.store,
            self.include_read_on_initial_sync,
            |_| {},
        )
        .await
        .map_err(|err| fetch_error(err, SyncError::Entries))?;
        if self.store.conf().await.initial_sync_completed {
            self.store.advance_cursor(started_at).await?;
        } else {
            self.store.complete_initial_sync(started_at).await?;
        }
        Ok(total)
    }

    /// Subscribes through the backend and stores the resolved feed.
    pub async fn add_feed(&self, url: &str) -> SyncResult<Feed> {
        self.ensure_online()?;
        let feed = self.backend().await.add_feed(url).await?;
        match self.store.insert_feed(feed.clone()).await {
            Ok(()) => {}
            Err(StoreError::DuplicateFeed(id)) => return Err(BackendError::Duplicate(id).into()),
            Err(err) => return Err(err.into()),
        }
        info!(feed = %feed.id, title = %feed.title, "feed added");
        Ok(feed)
    }

    pub async fn rename_feed(&self, id: &str, title: &str) -> SyncResult<()> {
        self.ensure_online()?;
        self.backend().await.rename_feed(id, title).await?;
        self.store.rename_feed(id, title).await?;
        Ok(())
    }

    /// Unsubscribes and deletes the feed with all of its entries.
    pub async fn delete_feed(&self, id: &str) -> SyncResult<usize> {
        self.ensure_online()?;
        self.backend().await.delete_feed(id).await?;
        let removed = self.store.delete_feed(id).await?;
        info!(feed = %id, removed, "feed deleted");
        Ok(removed)
    }

    /// Local read toggle; pushed on the next flag sync.
    pub async fn set_read(&self, entry_id: &str, read: bool) -> SyncResult<()> {
        Ok(self.store.set_read(entry_id, read).await?)
    }

    /// Local bookmark toggle; pushed on the next flag sync.
    pub async fn set_bookmarked(&self, entry_id: &str, bookmarked: bool) -> SyncResult<()> {
        Ok(self.store.set_bookmarked(entry_id, bookmarked).await?)
    }
}

fn fetch_error(err: FetchError, phase: fn(BackendError) -> SyncError) -> SyncError {
    match err {
        FetchError::Backend(err) => phase(err),
        FetchError::Store(err) => SyncError::Store(err),
    }
}
