//! Feedcache Core Library
//!
//! This library fetches and caches Atom/RSS feeds and downloads their media
//! enclosures while behaving as a polite HTTP client: unchanged feeds are
//! not re-downloaded, rate limits are backed off from, hosts are updated in
//! parallel but never hammered, and large files stream straight to disk.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - HTTP transport: redirect chase, body streaming, enclosures
//! - [`feed`] - Feed/item model, Atom/RSS parsing, feed lists and collections
//! - [`update`] - Fetch policy, update history and the host-grouped updater

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod feed;
pub mod update;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use download::{
    DownloadError, DownloadOutcome, DownloadProgress, EnclosureDownloader, FailureKind, HttpClient,
    classify_error,
};
pub use feed::{Enclosure, Feed, FeedEvent, FeedParseError, FeedSet, FeedStatus, Item, parse_feed};
pub use update::{
    BackoffIncrease, BackoffRecovery, FeedHistory, FeedUpdateContext, FeedUpdater, UpdateError,
    UpdateOptions,
};
