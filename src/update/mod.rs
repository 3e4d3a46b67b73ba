//! Feed update engine.
//!
//! This module decides whether a feed is fetched at all, fetches it through
//! the [`download`](crate::download) transport, parses the body into the
//! feed model and remembers enough history to make the next decision.
//!
//! # Features
//!
//! - Conditional requests with stored `ETag` / `Last-Modified` validators
//! - Last-Modified cooldown for feeds that rarely change
//! - Per-feed 429 backoff with configurable growth and recovery
//! - Timeout throttle for feeds that recently timed out
//! - Host-grouped batches: parallel across hosts, sequential within one
//!
//! See [`FeedUpdater`] for an example.

mod context;
mod engine;
mod history;
mod options;
mod policy;

pub use context::{BackoffIncrease, BackoffRecovery, FeedUpdateContext, RateLimitData};
pub use engine::{FeedUpdater, host_key};
pub use history::FeedHistory;
pub use options::{
    DEFAULT_CONCURRENCY, DEFAULT_FEED_TIMEOUT, DEFAULT_INTER_FEED_DELAY, DEFAULT_TIMEOUT_COOLDOWN,
    MAX_CONCURRENCY, MIN_CONCURRENCY, UpdateError, UpdateOptions,
};
pub use policy::{
    BACKOFF_SAFETY_PADDING, DEFAULT_INITIAL_BACKOFF, FetchPolicy, MAX_BACKOFF, PolicyDecision,
    parse_retry_after,
};
