use thiserror::Error;

/// Failures reported by a backend adapter.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("authentication failed")]
    Auth,
    #[error("no feed found at {0}")]
    InvalidFeed(String),
    #[error("feed already exists: {0}")]
    Duplicate(String),
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Parse(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("feed not found: {0}")]
    FeedNotFound(String),
    #[error("entry not found: {0}")]
    EntryNotFound(String),
    #[error("feed already stored: {0}")]
    DuplicateFeed(String),
}

/// Per-dimension outcome of a failed flag push.
#[derive(Debug, Default)]
pub struct FlagSyncFailure {
    pub read: Option<BackendError>,
    pub bookmarked: Option<BackendError>,
}

impl std::fmt::Display for FlagSyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.read, &self.bookmarked) {
            (Some(read), Some(bookmarked)) => {
                write!(f, "read flags: {read}; bookmark flags: {bookmarked}")
            }
            (Some(read), None) => write!(f, "read flags: {read}"),
            (None, Some(bookmarked)) => write!(f, "bookmark flags: {bookmarked}"),
            (None, None) => write!(f, "no flag errors"),
        }
    }
}

/// Typed failure surfaced to whoever triggered a sync.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no network connection")]
    Offline,
    #[error("a sync is already in progress")]
    AlreadySyncing,
    #[error("can't sync flags: {0}")]
    Flags(FlagSyncFailure),
    #[error("can't sync feeds: {0}")]
    Feeds(#[source] BackendError),
    #[error("can't sync new and updated entries: {0}")]
    Entries(#[source] BackendError),
    #[error("initial sync failed: {0}")]
    InitialSync(#[source] BackendError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("local store failure: {0}")]
    Store(#[from] StoreError),
}

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}
