//! Classification of transport failures.
//!
//! A failed fetch is reduced to a [`FailureKind`], which is stored in the
//! update history (the timeout throttle keys off it) and mapped onto the
//! [`FeedStatus`] reported for the feed.
//!
//! # Example
//!
//! ```
//! use feedcache_core::download::{DownloadError, FailureKind, classify_error};
//! use feedcache_core::feed::FeedStatus;
//!
//! let error = DownloadError::timeout("https://example.com/feed.xml");
//! let kind = classify_error(&error);
//! assert_eq!(kind, FailureKind::Timeout);
//! assert_eq!(kind.feed_status(), FeedStatus::Timeout);
//! ```

use std::error::Error as _;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::DownloadError;
use crate::feed::FeedStatus;

/// Why a fetch produced no usable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request or body read exceeded its time budget.
    Timeout,
    /// The caller canceled the operation.
    Canceled,
    /// The host name could not be resolved.
    Dns,
    /// TLS handshake or certificate validation failed.
    Tls,
    /// The connection could not be established.
    Connect,
    /// A redirect could not be followed.
    Redirect,
    /// Any other transport or protocol failure.
    Transport,
    /// Local file system failure.
    Io,
    /// The body was larger than allowed.
    TooLarge,
    /// The body could not be parsed as a feed.
    Parse,
    /// The URL was unusable.
    InvalidUrl,
}

impl FailureKind {
    /// Feed status reported for a fetch that failed this way.
    ///
    /// | Kind | Status |
    /// |------|--------|
    /// | Timeout | `Timeout` |
    /// | Canceled | `Other` |
    /// | Dns | `Dns` |
    /// | Tls | `CertificateRevocationCheckFailed` |
    /// | Connect | `InternetError` |
    /// | Redirect | `MovedCannotFollow` |
    /// | Parse | `ParseFailed` |
    /// | everything else | `Broken` |
    #[must_use]
    pub fn feed_status(self) -> FeedStatus {
        match self {
            Self::Timeout => FeedStatus::Timeout,
            Self::Canceled => FeedStatus::Other,
            Self::Dns => FeedStatus::Dns,
            Self::Tls => FeedStatus::CertificateRevocationCheckFailed,
            Self::Connect => FeedStatus::InternetError,
            Self::Redirect => FeedStatus::MovedCannotFollow,
            Self::Parse => FeedStatus::ParseFailed,
            Self::Transport | Self::Io | Self::TooLarge | Self::InvalidUrl => FeedStatus::Broken,
        }
    }
}

/// Classifies a download error.
///
/// reqwest does not expose DNS or TLS failures as distinct kinds, so the
/// source chain is inspected for the messages hyper and the TLS backends
/// produce. The top-level reqwest message is skipped since it embeds the
/// request URL.
#[instrument(level = "debug")]
pub fn classify_error(error: &DownloadError) -> FailureKind {
    match error {
        DownloadError::Timeout { .. } => FailureKind::Timeout,
        DownloadError::Canceled { .. } => FailureKind::Canceled,
        DownloadError::Io { .. } => FailureKind::Io,
        DownloadError::InvalidUrl { .. } => FailureKind::InvalidUrl,
        DownloadError::TooManyRedirects { .. } => FailureKind::Redirect,
        DownloadError::ResponseTooLarge { .. } => FailureKind::TooLarge,
        DownloadError::Network { source, .. } => classify_reqwest(source),
    }
}

fn classify_reqwest(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        return FailureKind::Timeout;
    }
    if error.is_redirect() {
        return FailureKind::Redirect;
    }

    kind_from_chain(&source_chain_text(error), error.is_connect())
}

fn kind_from_chain(chain: &str, is_connect: bool) -> FailureKind {
    if is_dns_error(chain) {
        FailureKind::Dns
    } else if is_tls_error(chain) {
        FailureKind::Tls
    } else if is_connect {
        FailureKind::Connect
    } else {
        FailureKind::Transport
    }
}

/// Lowercased messages of the error's sources, outermost first.
fn source_chain_text(error: &reqwest::Error) -> String {
    let mut parts = Vec::new();
    let mut source = error.source();
    while let Some(inner) = source {
        parts.push(inner.to_string().to_lowercase());
        source = inner.source();
    }
    parts.join(" | ")
}

fn is_tls_error(chain: &str) -> bool {
    chain.contains("certificate")
        || chain.contains("tls")
        || chain.contains("ssl")
        || chain.contains("handshake")
}

fn is_dns_error(chain: &str) -> bool {
    chain.contains("dns error")
        || chain.contains("failed to lookup address")
        || chain.contains("name or service not known")
        || chain.contains("no such host")
        || chain.contains("nodename nor servname")
}
