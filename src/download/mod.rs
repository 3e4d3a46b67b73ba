//! HTTP transport for feeds and enclosures.
//!
//! This module provides the primitives every fetch goes through: one logical
//! GET that may traverse redirects, and streaming of a response body either
//! into a bounded string (feed XML) or into a file (enclosures).
//!
//! # Features
//!
//! - Explicit redirect chase with a hop cap ([`MAX_REDIRECTS`])
//! - Conditional requests (`If-None-Match`, `If-Modified-Since`)
//! - Streaming downloads through `<final>.partial`, renamed only on success
//! - Failure preservation under `.error`, `.canceled` or `.failed`
//! - Cancellation at every send and every body chunk
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use feedcache_core::download::EnclosureDownloader;
//! use feedcache_core::feed::Enclosure;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let enclosure = Enclosure::new("https://example.com/episode.mp3", None);
//! let outcome = EnclosureDownloader::default()
//!     .download(&enclosure, Path::new("./episode.mp3"), &CancellationToken::new(), |progress| {
//!         println!("{progress}");
//!     })
//!     .await;
//! println!("{outcome:?}");
//! # }
//! ```

mod classify;
mod client;
pub mod constants;
mod enclosure;
mod error;
mod filename;
mod stream;

pub use classify::{FailureKind, classify_error};
pub use client::{ClientSettings, ConditionalHeaders, HttpClient, RedirectChain};
pub use constants::{MAX_FEED_BYTES, MAX_REDIRECTS};
pub use enclosure::{DownloadOutcome, EnclosureDownloader};
pub use error::DownloadError;
pub use filename::{FailureSuffix, failure_path, filename_from_url, partial_path};
pub use stream::{
    DownloadProgress, StreamFailure, content_length, preserve_error_response, read_to_string,
    stream_to_file,
};

// Note: no module-local Result alias; signatures spell out
// `Result<T, DownloadError>`.
