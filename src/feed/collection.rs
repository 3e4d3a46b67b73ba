//! The caller's set of subscribed feeds.
//!
//! [`FeedSet`] owns the [`Feed`] objects, rejects duplicate URIs, drops the
//! update history of feeds that leave the set and reports every change to an
//! optional listener.

use std::fmt;
use std::io::BufRead;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use super::list::read_feed_list;
use super::model::{Feed, FeedStatus};
use crate::update::{FeedHistory, FeedUpdateContext, FeedUpdater};

/// Change notification emitted by a [`FeedSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A feed joined the set.
    Added {
        /// URI of the new feed.
        uri: Url,
    },
    /// A feed left the set.
    Removed {
        /// URI of the removed feed.
        uri: Url,
    },
    /// Every feed was removed.
    Cleared,
    /// An update attempt finished for a feed.
    Updated {
        /// URI of the updated feed.
        uri: Url,
        /// Status reported by the attempt.
        status: FeedStatus,
        /// Items added by the attempt.
        new_items: usize,
    },
    /// Items of a feed were marked read.
    Read {
        /// URI of the feed.
        uri: Url,
        /// Number of items that changed from unread to read.
        count: usize,
    },
}

type Listener = Box<dyn Fn(&FeedEvent) + Send + Sync>;

/// Ordered collection of feeds, unique by URI.
#[derive(Default)]
pub struct FeedSet {
    feeds: Vec<Feed>,
    history: Option<Arc<FeedHistory>>,
    listener: Option<Listener>,
}

impl fmt::Debug for FeedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSet")
            .field("feeds", &self.feeds.len())
            .field("has_history", &self.history.is_some())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

impl FeedSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty set whose removals evict records from `history`.
    ///
    /// Without this, the set adopts the history of the first updater it is
    /// updated with.
    #[must_use]
    pub fn with_history(history: Arc<FeedHistory>) -> Self {
        Self {
            history: Some(history),
            ..Self::default()
        }
    }

    /// Registers the change listener, replacing any previous one.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&FeedEvent) + Send + Sync + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    fn notify(&self, event: &FeedEvent) {
        if let Some(listener) = &self.listener {
            listener(event);
        }
    }

    /// Adds every URI from a feed list. Returns the number of feeds added.
    pub fn load_from<R: BufRead>(&mut self, reader: R) -> usize {
        let added = read_feed_list(reader)
            .into_iter()
            .filter(|uri| self.add(uri.clone()))
            .count();
        info!(added, total = self.feeds.len(), "feed list loaded");
        added
    }

    /// Adds a feed. Returns false if a feed with this URI is already present.
    pub fn add(&mut self, uri: Url) -> bool {
        if self.contains(&uri) {
            debug!(feed = %uri, "duplicate feed ignored");
            return false;
        }
        self.feeds.push(Feed::new(uri.clone()));
        self.notify(&FeedEvent::Added { uri });
        true
    }

    /// Removes a feed and its update history. Returns true if it was present.
    pub fn remove(&mut self, uri: &Url) -> bool {
        let Some(position) = self.feeds.iter().position(|feed| feed.uri() == uri) else {
            return false;
        };
        self.feeds.remove(position);
        if let Some(history) = &self.history {
            history.remove(uri.as_str());
        }
        self.notify(&FeedEvent::Removed { uri: uri.clone() });
        true
    }

    /// Removes every feed and its history.
    pub fn clear(&mut self) {
        if let Some(history) = &self.history {
            for feed in &self.feeds {
                history.remove(feed.uri().as_str());
            }
        }
        self.feeds.clear();
        self.notify(&FeedEvent::Cleared);
    }

    #[must_use]
    pub fn contains(&self, uri: &Url) -> bool {
        self.feeds.iter().any(|feed| feed.uri() == uri)
    }

    #[must_use]
    pub fn get(&self, uri: &Url) -> Option<&Feed> {
        self.feeds.iter().find(|feed| feed.uri() == uri)
    }

    /// Feeds in insertion order.
    #[must_use]
    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Total unread items across all feeds.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.feeds.iter().map(Feed::unread_count).sum()
    }

    /// Marks one item read. Returns true if its state changed.
    pub fn mark_item_read(&mut self, feed_uri: &Url, link: &str) -> bool {
        let Some(feed) = self.feeds.iter_mut().find(|feed| feed.uri() == feed_uri) else {
            return false;
        };
        let changed = feed.mark_item_read(link);
        if changed {
            self.notify(&FeedEvent::Read {
                uri: feed_uri.clone(),
                count: 1,
            });
        }
        changed
    }

    /// Marks every item of one feed read. Returns the number changed.
    pub fn mark_feed_read(&mut self, feed_uri: &Url) -> usize {
        let Some(feed) = self.feeds.iter_mut().find(|feed| feed.uri() == feed_uri) else {
            return 0;
        };
        let count = feed.mark_all_read();
        if count > 0 {
            self.notify(&FeedEvent::Read {
                uri: feed_uri.clone(),
                count,
            });
        }
        count
    }

    /// Marks every item of every feed read. Returns the number changed.
    pub fn mark_all_read(&mut self) -> usize {
        let changed: Vec<(Url, usize)> = self
            .feeds
            .iter_mut()
            .filter_map(|feed| {
                let count = feed.mark_all_read();
                (count > 0).then(|| (feed.uri().clone(), count))
            })
            .collect();
        for (uri, count) in &changed {
            self.notify(&FeedEvent::Read {
                uri: uri.clone(),
                count: *count,
            });
        }
        changed.iter().map(|(_, count)| count).sum()
    }

    /// Updates every feed through `updater` and reports each result.
    #[instrument(skip(self, updater, cancel), fields(feeds = self.feeds.len()))]
    pub async fn update(
        &mut self,
        updater: &FeedUpdater,
        conditional: bool,
        cancel: &CancellationToken,
    ) -> Vec<FeedUpdateContext> {
        if self.history.is_none() {
            self.history = Some(Arc::clone(updater.history()));
        }
        let results = updater
            .update_feeds(&mut self.feeds, conditional, cancel)
            .await;
        for result in &results {
            if let Ok(uri) = Url::parse(&result.feed_uri) {
                self.notify(&FeedEvent::Updated {
                    uri,
                    status: result.status,
                    new_items: result.new_items,
                });
            }
        }
        results
    }
}
