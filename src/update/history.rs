//! Shared per-feed update history.
//!
//! [`FeedHistory`] is the only mutable state shared between concurrent update
//! tasks. It is designed to be wrapped in `Arc`; `DashMap` shards keep
//! unrelated feeds from contending, and no entry is held across an await.

use dashmap::DashMap;
use tracing::{debug, instrument};

use super::context::FeedUpdateContext;

/// In-memory history of update attempts, keyed by feed URI.
#[derive(Debug, Default)]
pub struct FeedHistory {
    entries: DashMap<String, FeedUpdateContext>,
}

impl FeedHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the record for `feed_uri`, if any.
    #[must_use]
    pub fn get(&self, feed_uri: &str) -> Option<FeedUpdateContext> {
        self.entries.get(feed_uri).map(|entry| entry.value().clone())
    }

    /// Returns the record for `feed_uri`, or an empty one for a new feed.
    #[must_use]
    pub fn get_or_new(&self, feed_uri: &str) -> FeedUpdateContext {
        self.get(feed_uri)
            .unwrap_or_else(|| FeedUpdateContext::new(feed_uri))
    }

    /// Merges `context` into the stored record and returns the merged result.
    ///
    /// See [`FeedUpdateContext::merge_forward`] for which fields may change.
    #[instrument(level = "debug", skip(self, context), fields(feed = %context.feed_uri, status = %context.status))]
    pub fn record(&self, context: FeedUpdateContext) -> FeedUpdateContext {
        let mut entry = self
            .entries
            .entry(context.feed_uri.clone())
            .or_insert_with(|| FeedUpdateContext::new(context.feed_uri.clone()));
        entry.merge_forward(context);
        debug!(skipped = entry.network_skipped, "history updated");
        entry.value().clone()
    }

    /// Drops the record for `feed_uri`. Returns true if one existed.
    pub fn remove(&self, feed_uri: &str) -> bool {
        self.entries.remove(feed_uri).is_some()
    }

    /// Drops every record.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of feeds with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no feed has a record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every record, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FeedUpdateContext> {
        self.entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::feed::FeedStatus;

    const URI: &str = "https://example.com/feed";

    #[test]
    fn test_get_or_new_for_unknown_feed() {
        let history = FeedHistory::new();
        let ctx = history.get_or_new(URI);
        assert_eq!(ctx.feed_uri, URI);
        assert_eq!(ctx.status, FeedStatus::None);
        assert!(history.is_empty(), "lookup does not insert");
    }

    #[test]
    fn test_record_merges_forward() {
        let history = FeedHistory::new();
        let mut first = FeedUpdateContext::new(URI);
        first.etag = Some("\"v1\"".to_string());
        first.last_finished = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        history.record(first);

        let mut second = FeedUpdateContext::new(URI);
        second.status = FeedStatus::Ok;
        second.last_finished = Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        let merged = history.record(second);

        assert_eq!(merged.etag.as_deref(), Some("\"v1\""));
        assert_eq!(merged.status, FeedStatus::Ok);
        assert_eq!(history.get(URI).unwrap(), merged);
    }

    #[test]
    fn test_remove_and_clear() {
        let history = FeedHistory::new();
        history.record(FeedUpdateContext::new(URI));
        history.record(FeedUpdateContext::new("https://other.org/rss"));
        assert_eq!(history.len(), 2);

        assert!(history.remove(URI));
        assert!(!history.remove(URI));
        assert_eq!(history.len(), 1);

        history.clear();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_records_are_all_kept() {
        let history = Arc::new(FeedHistory::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let history = Arc::clone(&history);
            handles.push(tokio::spawn(async move {
                history.record(FeedUpdateContext::new(format!("https://host{i}.example/feed")));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(history.len(), 16);
        assert_eq!(history.snapshot().len(), 16);
    }
}
