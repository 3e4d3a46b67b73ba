//! Feed, item and enclosure types plus the feed status enum.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Fallback display name for feeds whose document carries no usable title.
pub const FEED_TITLE_FALLBACK: &str = "untitled feed";

/// Fallback display name for items without a usable title.
pub const ITEM_TITLE_FALLBACK: &str = "title not found";

/// Timestamp assigned to items whose publish date could not be parsed.
///
/// Items carrying it sort after every dated item.
pub const UNKNOWN_PUBLISHED: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// Status of a feed after its most recent update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    /// Never updated.
    #[default]
    None,
    /// An update attempt is in progress.
    Updating,
    /// Fetched (or legitimately skipped) without problems.
    Ok,
    /// The server reports the feed is gone (404/410).
    DoesNotExist,
    /// The server refused access (403).
    Forbidden,
    /// The body was not a recognizable Atom/RSS document.
    ParseFailed,
    /// A redirect could not be followed.
    MovedCannotFollow,
    /// The attempt timed out, or is throttled after a recent timeout.
    Timeout,
    /// The host name could not be resolved.
    Dns,
    /// The server asked us to slow down (429), or the backoff is still active.
    RateLimited,
    /// Connection-level failure.
    InternetError,
    /// The transport produced nothing usable.
    Broken,
    /// TLS or certificate validation failed.
    CertificateRevocationCheckFailed,
    /// Any other outcome.
    Other,
}

impl FeedStatus {
    /// Returns a stable snake-case label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Updating => "updating",
            Self::Ok => "ok",
            Self::DoesNotExist => "does_not_exist",
            Self::Forbidden => "forbidden",
            Self::ParseFailed => "parse_failed",
            Self::MovedCannotFollow => "moved_cannot_follow",
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::RateLimited => "rate_limited",
            Self::InternetError => "internet_error",
            Self::Broken => "broken",
            Self::CertificateRevocationCheckFailed => "certificate_revocation_check_failed",
            Self::Other => "other",
        }
    }

    /// Returns true for statuses that indicate the last attempt did not succeed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::None | Self::Updating | Self::Ok)
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A media file attached to an item.
///
/// The download flag and progress message use interior mutability so that a
/// shared `&Enclosure` can be handed to the downloader while the owning feed
/// stays borrowed elsewhere.
#[derive(Debug)]
pub struct Enclosure {
    link: String,
    declared_size: Option<u64>,
    downloading: AtomicBool,
    message: Mutex<String>,
}

impl Enclosure {
    /// Creates an idle enclosure.
    #[must_use]
    pub fn new(link: impl Into<String>, declared_size: Option<u64>) -> Self {
        Self {
            link: link.into(),
            declared_size,
            downloading: AtomicBool::new(false),
            message: Mutex::new(String::new()),
        }
    }

    /// Download URI as it appeared in the feed.
    #[must_use]
    pub fn link(&self) -> &str {
        &self.link
    }

    /// Size declared by the feed's `length` attribute, if any.
    #[must_use]
    pub fn declared_size(&self) -> Option<u64> {
        self.declared_size
    }

    /// Returns true while a download of this enclosure is running.
    #[must_use]
    pub fn is_downloading(&self) -> bool {
        self.downloading.load(Ordering::SeqCst)
    }

    /// Human-readable progress or result of the latest download.
    #[must_use]
    pub fn message(&self) -> String {
        self.message
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_message(&self, message: impl Into<String>) {
        *self
            .message
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = message.into();
    }

    /// Claims the downloading flag. Returns false if it was already held.
    pub(crate) fn try_begin_download(&self) -> bool {
        self.downloading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_download(&self) {
        self.downloading.store(false, Ordering::SeqCst);
    }
}

/// A single entry of a feed.
#[derive(Debug)]
pub struct Item {
    name: String,
    link: String,
    published: DateTime<Utc>,
    unread: bool,
    enclosure: Option<Enclosure>,
}

impl Item {
    /// Creates an unread item.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        link: impl Into<String>,
        published: DateTime<Utc>,
        enclosure: Option<Enclosure>,
    ) -> Self {
        Self {
            name: name.into(),
            link: link.into(),
            published,
            unread: true,
            enclosure,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn link(&self) -> &str {
        &self.link
    }

    /// Publish timestamp, or [`UNKNOWN_PUBLISHED`] when the feed's date was unusable.
    #[must_use]
    pub fn published(&self) -> DateTime<Utc> {
        self.published
    }

    #[must_use]
    pub fn is_unread(&self) -> bool {
        self.unread
    }

    #[must_use]
    pub fn enclosure(&self) -> Option<&Enclosure> {
        self.enclosure.as_ref()
    }

    /// Marks the item read. Returns true if the flag changed.
    pub fn mark_read(&mut self) -> bool {
        std::mem::replace(&mut self.unread, false)
    }

    /// Identity used for deduplication: the link's path and query.
    ///
    /// Scheme, host and fragment are ignored so that an item moving between
    /// `http` and `https` or between mirror hosts is not ingested twice.
    /// Items without a parseable absolute link fall back to the raw link, or
    /// to the name when the link is empty.
    #[must_use]
    pub fn identity(&self) -> String {
        match Url::parse(&self.link) {
            Ok(url) => match url.query() {
                Some(query) => format!("{}?{query}", url.path()),
                None => url.path().to_string(),
            },
            Err(_) if self.link.trim().is_empty() => self.name.clone(),
            Err(_) => self.link.trim().to_string(),
        }
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Item {}

/// A subscribed feed, identified by its fetch URI.
#[derive(Debug)]
pub struct Feed {
    uri: Url,
    name: String,
    status: FeedStatus,
    items: Vec<Item>,
}

impl Feed {
    /// Creates a feed with no items. The display name starts as the URI.
    #[must_use]
    pub fn new(uri: Url) -> Self {
        let name = uri.to_string();
        Self {
            uri,
            name,
            status: FeedStatus::None,
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub fn status(&self) -> FeedStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: FeedStatus) {
        self.status = status;
    }

    /// Items ordered newest first.
    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_unread()).count()
    }

    /// Adds items not already present, leaving existing ones untouched.
    ///
    /// Returns the number of items added.
    pub fn merge_items(&mut self, incoming: impl IntoIterator<Item = Item>) -> usize {
        let mut added = 0;
        for item in incoming {
            let identity = item.identity();
            if self.items.iter().any(|existing| existing.identity() == identity) {
                continue;
            }
            self.items.push(item);
            added += 1;
        }
        if added > 0 {
            // Stable, so equal timestamps keep feed order.
            self.items.sort_by(|a, b| b.published.cmp(&a.published));
        }
        added
    }

    /// Marks the item with the given link read. Returns true if anything changed.
    pub fn mark_item_read(&mut self, link: &str) -> bool {
        self.items
            .iter_mut()
            .find(|item| item.link == link)
            .is_some_and(Item::mark_read)
    }

    /// Marks every item read. Returns the number of items that changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for item in &mut self.items {
            if item.mark_read() {
                changed += 1;
            }
        }
        changed
    }
}
