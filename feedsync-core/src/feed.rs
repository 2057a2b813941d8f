use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

impl Link {
    pub fn new(rel: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            href: href.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feed {
    pub id: String,
    pub title: String,
    pub links: Vec<Link>,
    #[serde(default)]
    pub open_entries_in_browser: Option<bool>,
    #[serde(default)]
    pub blocked_words: Vec<String>,
    /// `None` follows the global preview-image setting.
    #[serde(default)]
    pub show_preview_images: Option<bool>,
}

impl Feed {
    pub fn new(id: impl Into<String>, title: impl Into<String>, links: Vec<Link>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            links,
            open_entries_in_browser: None,
            blocked_words: Vec::new(),
            show_preview_images: None,
        }
    }

    pub fn self_link(&self) -> Option<&str> {
        self.link_with_rel("self")
    }

    pub fn alternate_link(&self) -> Option<&str> {
        self.link_with_rel("alternate")
    }

    fn link_with_rel(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == rel)
            .map(|link| link.href.as_str())
    }

    /// Copies the user-owned overrides of `local` onto a freshly fetched remote record.
    pub fn with_overrides_from(mut self, local: &Feed) -> Self {
        self.open_entries_in_browser = local.open_entries_in_browser;
        self.blocked_words = local.blocked_words.clone();
        self.show_preview_images = local.show_preview_images;
        self
    }

    /// Whether the entry title contains one of the blocked words (case-insensitive).
    pub fn is_blocked(&self, entry: &Entry) -> bool {
        if self.blocked_words.is_empty() {
            return false;
        }
        let title = entry.content.title.to_lowercase();
        self.blocked_words
            .iter()
            .filter(|word| !word.trim().is_empty())
            .any(|word| title.contains(&word.trim().to_lowercase()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub media_type: String,
}

/// The part of an entry owned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryContent {
    pub id: String,
    pub feed_id: String,
    pub title: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub author_name: Option<String>,
    pub content_html: Option<String>,
    pub enclosure: Option<Enclosure>,
    /// Opaque key some backends need to address the entry when pushing flags.
    #[serde(default)]
    pub guid_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    #[serde(flatten)]
    pub content: EntryContent,
    pub read: bool,
    pub read_synced: bool,
    pub bookmarked: bool,
    pub bookmarked_synced: bool,
}

impl Entry {
    pub fn id(&self) -> &str {
        &self.content.id
    }

    pub fn feed_id(&self) -> &str {
        &self.content.feed_id
    }

    pub fn is_dirty(&self) -> bool {
        !self.read_synced || !self.bookmarked_synced
    }

    pub(crate) fn from_remote(remote: RemoteEntry) -> Self {
        Self {
            content: remote.content,
            read: remote.read.unwrap_or(false),
            read_synced: true,
            bookmarked: remote.bookmarked.unwrap_or(false),
            bookmarked_synced: true,
        }
    }

    /// Overwrites the backend-owned fields with `remote`. A dimension with a
    /// pending local edit keeps its local value; otherwise the remote value wins
    /// when the backend has one.
    pub(crate) fn merge_remote(&mut self, remote: RemoteEntry) {
        self.content = remote.content;
        if self.read_synced {
            if let Some(read) = remote.read {
                self.read = read;
            }
        }
        if self.bookmarked_synced {
            if let Some(bookmarked) = remote.bookmarked {
                self.bookmarked = bookmarked;
            }
        }
    }
}

/// An entry as reported by a backend. `None` flags mean the backend keeps no
/// opinion on that dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub content: EntryContent,
    pub read: Option<bool>,
    pub bookmarked: Option<bool>,
}

impl RemoteEntry {
    pub fn id(&self) -> &str {
        &self.content.id
    }
}
