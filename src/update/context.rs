//! Per-feed update history records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::download::FailureKind;
use crate::feed::FeedStatus;

/// How the backoff grows on each new 429 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffIncrease {
    /// Double the current backoff.
    #[default]
    Double,
    /// Add one hour.
    AddHour,
    /// Add one day.
    AddDay,
}

impl BackoffIncrease {
    /// Applies the increase to `current`, saturating rather than overflowing.
    #[must_use]
    pub fn apply(self, current: Duration) -> Duration {
        match self {
            Self::Double => current.saturating_mul(2),
            Self::AddHour => current.saturating_add(Duration::from_secs(3600)),
            Self::AddDay => current.saturating_add(Duration::from_secs(86_400)),
        }
    }
}

/// What happens to an existing backoff when a non-429 response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffRecovery {
    /// Keep the learned backoff.
    #[default]
    Maintain,
    /// Drop back to the configured starting backoff.
    Reset,
}

/// Rate-limit state learned from responses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateLimitData {
    /// Status code of the response that produced this state.
    pub status_code: Option<u16>,
    /// When that response was observed.
    pub observed_at: Option<DateTime<Utc>>,
    /// Current backoff; zero when the feed was never limited.
    pub backoff: Duration,
    /// Strategy used for growth.
    pub increase: BackoffIncrease,
    /// Strategy used after recovery.
    pub recovery: BackoffRecovery,
}

impl RateLimitData {
    /// Returns true if a backoff is in effect.
    #[must_use]
    pub fn is_limited(&self) -> bool {
        !self.backoff.is_zero()
    }
}

/// History of one feed's update attempts, keyed by feed URI.
///
/// `last_started`, `last_finished`, `last_status_code` and `last_failure`
/// describe the most recent attempt that actually reached the network;
/// `status` and `network_skipped` describe the most recent attempt of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedUpdateContext {
    /// Feed URI this record belongs to.
    pub feed_uri: String,
    /// Status reported by the latest attempt.
    pub status: FeedStatus,
    /// Whether the latest attempt was answered by the policy without a request.
    pub network_skipped: bool,
    /// Start of the latest network attempt.
    pub last_started: Option<DateTime<Utc>>,
    /// End of the latest network attempt.
    pub last_finished: Option<DateTime<Utc>>,
    /// HTTP status of the latest network attempt, if a response arrived.
    pub last_status_code: Option<u16>,
    /// Latest `Last-Modified` seen for the feed.
    pub last_modified: Option<DateTime<Utc>>,
    /// Latest `ETag` seen for the feed.
    pub etag: Option<String>,
    /// Rate-limit state.
    pub rate_limit: RateLimitData,
    /// Classification of the latest network attempt's failure.
    pub last_failure: Option<FailureKind>,
    /// Number of redirects followed by the latest network attempt.
    pub redirects: usize,
    /// Items added by the latest network attempt.
    pub new_items: usize,
}

impl FeedUpdateContext {
    /// Creates an empty record for a feed that has never been updated.
    #[must_use]
    pub fn new(feed_uri: impl Into<String>) -> Self {
        Self {
            feed_uri: feed_uri.into(),
            status: FeedStatus::None,
            network_skipped: false,
            last_started: None,
            last_finished: None,
            last_status_code: None,
            last_modified: None,
            etag: None,
            rate_limit: RateLimitData::default(),
            last_failure: None,
            redirects: 0,
            new_items: 0,
        }
    }

    /// Folds a newer record into this one without regressing learned state.
    ///
    /// Attempt fields are replaced only when `newer` finished no earlier than
    /// the stored attempt; `last_modified` only moves forward; an etag is only
    /// replaced by another etag; rate-limit data is replaced only by an
    /// observation at least as recent.
    pub fn merge_forward(&mut self, newer: FeedUpdateContext) {
        self.status = newer.status;
        self.network_skipped = newer.network_skipped;

        if !newer.network_skipped && newer.last_finished >= self.last_finished {
            self.last_started = newer.last_started;
            self.last_finished = newer.last_finished;
            self.last_status_code = newer.last_status_code;
            self.last_failure = newer.last_failure;
            self.redirects = newer.redirects;
            self.new_items = newer.new_items;
        } else if newer.network_skipped {
            self.new_items = 0;
        }

        self.last_modified = self.last_modified.max(newer.last_modified);
        if newer.etag.is_some() {
            self.etag = newer.etag;
        }
        if newer.rate_limit.observed_at >= self.rate_limit.observed_at {
            self.rate_limit = newer.rate_limit;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn attempt(hour: u32) -> FeedUpdateContext {
        let mut ctx = FeedUpdateContext::new("https://example.com/feed");
        ctx.status = FeedStatus::Ok;
        ctx.last_started = Some(at(hour));
        ctx.last_finished = Some(at(hour));
        ctx.last_status_code = Some(200);
        ctx
    }

    #[test]
    fn test_backoff_increase_strategies() {
        let base = Duration::from_secs(60);
        assert_eq!(BackoffIncrease::Double.apply(base), Duration::from_secs(120));
        assert_eq!(BackoffIncrease::AddHour.apply(base), Duration::from_secs(3660));
        assert_eq!(BackoffIncrease::AddDay.apply(base), Duration::from_secs(86_460));
        assert_eq!(BackoffIncrease::Double.apply(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn test_merge_never_regresses_last_modified() {
        let mut stored = attempt(1);
        stored.last_modified = Some(at(5));
        let mut newer = attempt(2);
        newer.last_modified = Some(at(3));

        stored.merge_forward(newer);

        assert_eq!(stored.last_modified, Some(at(5)));
        assert_eq!(stored.last_finished, Some(at(2)));
    }

    #[test]
    fn test_merge_ignores_older_attempt() {
        let mut stored = attempt(5);
        let mut older = attempt(1);
        older.last_status_code = Some(500);
        older.status = FeedStatus::Other;

        stored.merge_forward(older);

        assert_eq!(stored.last_status_code, Some(200));
        assert_eq!(stored.last_finished, Some(at(5)));
        assert_eq!(stored.status, FeedStatus::Other, "status follows the latest report");
    }

    #[test]
    fn test_merge_keeps_etag_when_newer_has_none() {
        let mut stored = attempt(1);
        stored.etag = Some("\"abc\"".to_string());
        stored.merge_forward(attempt(2));
        assert_eq!(stored.etag.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn test_merge_skip_keeps_attempt_fields() {
        let mut stored = attempt(1);
        let mut skip = stored.clone();
        skip.network_skipped = true;
        skip.status = FeedStatus::RateLimited;
        skip.last_finished = Some(at(9));

        stored.merge_forward(skip);

        assert_eq!(stored.last_finished, Some(at(1)));
        assert_eq!(stored.status, FeedStatus::RateLimited);
        assert!(stored.network_skipped);
    }

    #[test]
    fn test_merge_rate_limit_only_from_newer_observation() {
        let mut stored = attempt(1);
        stored.rate_limit = RateLimitData {
            status_code: Some(429),
            observed_at: Some(at(4)),
            backoff: Duration::from_secs(600),
            ..RateLimitData::default()
        };
        let mut stale = attempt(2);
        stale.rate_limit.observed_at = Some(at(3));

        stored.merge_forward(stale);
        assert_eq!(stored.rate_limit.backoff, Duration::from_secs(600));

        let mut reset = attempt(3);
        reset.rate_limit = RateLimitData {
            status_code: Some(200),
            observed_at: Some(at(6)),
            backoff: Duration::from_secs(60),
            recovery: BackoffRecovery::Reset,
            ..RateLimitData::default()
        };
        stored.merge_forward(reset);
        assert_eq!(stored.rate_limit.backoff, Duration::from_secs(60));
    }
}
