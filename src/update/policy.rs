//! Rate-limit and conditional-fetch policy.
//!
//! This module provides [`FetchPolicy`], which decides before any network
//! call whether a feed should be fetched at all, and how the learned backoff
//! evolves after each response.
//!
//! # Overview
//!
//! Decisions are evaluated in priority order:
//!
//! 1. **Last-Modified cooldown**: content that has not changed for a long
//!    time is not re-checked until a window proportional to its staleness
//!    has passed.
//! 2. **Active rate limit**: the server answered 429 and the backoff window
//!    has not elapsed.
//! 3. **Voluntary backoff**: a backoff is still in effect although the last
//!    response was not a 429.
//! 4. **Timeout throttle**: the last attempt timed out recently.
//!
//! The policy is pure: the same context, time and settings always produce
//! the same decision.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use feedcache_core::update::{FeedUpdateContext, FetchPolicy, PolicyDecision};
//!
//! let policy = FetchPolicy::default();
//! let context = FeedUpdateContext::new("https://example.com/feed.xml");
//! assert_eq!(policy.decide(&context, Utc::now(), true), PolicyDecision::Fetch);
//! ```

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, instrument, warn};

use super::context::{BackoffIncrease, BackoffRecovery, FeedUpdateContext, RateLimitData};
use crate::download::FailureKind;
use crate::feed::FeedStatus;

/// Maximum backoff after repeated 429 responses (36 hours).
pub const MAX_BACKOFF: Duration = Duration::from_secs(36 * 3600);

/// Padding added to every backoff window.
pub const BACKOFF_SAFETY_PADDING: Duration = Duration::from_secs(10);

/// Default backoff applied on the first 429 when none is known yet.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(60);

const DAY: i64 = 86_400;
const HOUR: i64 = 3_600;

/// Staleness → skip window steps, checked top-down (seconds).
const COOLDOWN_STEPS: [(i64, i64); 5] = [
    (50 * DAY, 3 * DAY),
    (30 * DAY, 2 * DAY),
    (20 * DAY, DAY),
    (8 * DAY, 3 * HOUR),
    (3 * DAY, HOUR),
];

/// Outcome of the pre-request policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Perform the request.
    Fetch,
    /// Content looks static and was checked recently.
    SkipUnchanged,
    /// The server rate-limited us and the backoff is still running.
    SkipRateLimited,
    /// A voluntary backoff is still running.
    SkipThrottled,
    /// The last attempt timed out and the timeout delay is still running.
    SkipAfterTimeout,
}

impl PolicyDecision {
    /// Status to report when the request is skipped, `None` for [`Self::Fetch`].
    #[must_use]
    pub fn skip_status(self) -> Option<FeedStatus> {
        match self {
            Self::Fetch => None,
            Self::SkipUnchanged | Self::SkipThrottled => Some(FeedStatus::Ok),
            Self::SkipRateLimited => Some(FeedStatus::RateLimited),
            Self::SkipAfterTimeout => Some(FeedStatus::Timeout),
        }
    }
}

/// Caller-supplied rate-limit and conditional-fetch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Growth strategy on each new 429.
    pub increase: BackoffIncrease,
    /// Behavior on a non-429 response after a prior limit.
    pub recovery: BackoffRecovery,
    /// Starting backoff used when a 429 arrives with no backoff yet known.
    pub initial_backoff: Duration,
    /// How long to leave a feed alone after a timeout; `None` disables.
    pub timeout_cooldown: Option<Duration>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            increase: BackoffIncrease::Double,
            recovery: BackoffRecovery::Maintain,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            timeout_cooldown: Some(Duration::from_secs(15 * 60)),
        }
    }
}

impl FetchPolicy {
    /// Decides whether a request should be made for the feed described by `context`.
    ///
    /// The Last-Modified cooldown only applies to conditional updates; rate
    /// limits and timeout throttles apply to every update.
    #[must_use]
    pub fn decide(
        &self,
        context: &FeedUpdateContext,
        now: DateTime<Utc>,
        conditional: bool,
    ) -> PolicyDecision {
        let Some(finished) = context.last_finished else {
            return PolicyDecision::Fetch;
        };

        if conditional
            && matches!(context.last_status_code, Some(200 | 304))
            && let Some(last_modified) = context.last_modified
        {
            let window = cooldown_window(finished - last_modified);
            if window > TimeDelta::zero() && now - finished < window {
                return PolicyDecision::SkipUnchanged;
            }
        }

        let rate_limit = &context.rate_limit;
        if rate_limit.is_limited() {
            let window = rate_limit.backoff.saturating_add(BACKOFF_SAFETY_PADDING);
            if is_before(now, finished, window) {
                return if context.last_status_code == Some(429) {
                    PolicyDecision::SkipRateLimited
                } else {
                    PolicyDecision::SkipThrottled
                };
            }
        }

        if context.last_failure == Some(FailureKind::Timeout)
            && let Some(cooldown) = self.timeout_cooldown
            && is_before(now, finished, cooldown)
        {
            return PolicyDecision::SkipAfterTimeout;
        }

        PolicyDecision::Fetch
    }

    /// Computes the rate-limit state after a response with `status_code`.
    ///
    /// A 429 grows the backoff (starting from [`Self::initial_backoff`] when
    /// none is known), caps it at [`MAX_BACKOFF`] and raises it to at least
    /// `retry_after`. Any other status applies the recovery strategy to an
    /// existing backoff.
    #[instrument(level = "debug", skip(self, previous), fields(previous_ms = previous.backoff.as_millis()))]
    pub fn after_response(
        &self,
        previous: &RateLimitData,
        status_code: u16,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
    ) -> RateLimitData {
        let backoff = if status_code == 429 {
            let base = if previous.is_limited() {
                previous.backoff
            } else {
                self.initial_backoff
            };
            let grown = self.increase.apply(base).min(MAX_BACKOFF);
            let backoff = retry_after.map_or(grown, |delay| grown.max(delay.min(MAX_BACKOFF)));
            if backoff == MAX_BACKOFF {
                warn!(
                    max_secs = MAX_BACKOFF.as_secs(),
                    "rate limit backoff reached its maximum"
                );
            }
            debug!(backoff_ms = backoff.as_millis(), "rate limit backoff increased");
            backoff
        } else if previous.is_limited() {
            match self.recovery {
                BackoffRecovery::Maintain => previous.backoff,
                BackoffRecovery::Reset => self.initial_backoff,
            }
        } else {
            Duration::ZERO
        };

        RateLimitData {
            status_code: Some(status_code),
            observed_at: Some(now),
            backoff,
            increase: self.increase,
            recovery: self.recovery,
        }
    }
}

/// Skip window for content that has been unchanged for `staleness`.
fn cooldown_window(staleness: TimeDelta) -> TimeDelta {
    COOLDOWN_STEPS
        .iter()
        .find(|(min_staleness, _)| staleness >= TimeDelta::seconds(*min_staleness))
        .map_or(TimeDelta::zero(), |(_, window)| TimeDelta::seconds(*window))
}

/// Returns true if `now` is earlier than `since + window`.
fn is_before(now: DateTime<Utc>, since: DateTime<Utc>, window: Duration) -> bool {
    let Ok(window) = TimeDelta::from_std(window) else {
        return true;
    };
    since
        .checked_add_signed(window)
        .is_none_or(|deadline| now < deadline)
}

/// Parses a `Retry-After` header value into a delay relative to `now`.
///
/// Supports both RFC 9110 forms:
/// - delta-seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2015 07:28:00 GMT`
///
/// Dates in the past yield zero. Returns `None` for unparseable values.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use feedcache_core::update::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120", Utc::now()), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("soon", Utc::now()), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        return Some(Duration::from_secs(seconds as u64));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(date) => {
            let date: DateTime<Utc> = date.into();
            Some((date - now).to_std().unwrap_or(Duration::ZERO))
        }
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}
