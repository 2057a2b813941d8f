pub mod backend;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod reconcile;
pub mod storage;

pub use backend::{
    build_backend, Backend, BackendKind, CursorKind, EntryBatches, IncrementalCursor,
    MinifluxBackend, NextcloudBackend, StandaloneBackend,
};
pub use config::{AppConfig, BackendConfig, HttpConfig, SyncConfig};
pub use connectivity::{AlwaysOnline, Connectivity, NetworkFlag};
pub use engine::{InitialSyncOutcome, SyncArgs, SyncEngine, SyncReport, SyncStatus};
pub use error::{BackendError, ConfigError, FlagSyncFailure, StoreError, SyncError, SyncResult};
pub use feed::{Enclosure, Entry, EntryContent, Feed, Link, RemoteEntry};
pub use reconcile::FlagReport;
pub use storage::{FeedListChanges, Store, SyncConf};
