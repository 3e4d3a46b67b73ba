//! Error types for the download module.
//!
//! Every variant carries the URL or path it concerns, so failures can be
//! logged and reported without extra context from the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching feeds or downloading enclosures.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The caller canceled the operation.
    #[error("canceled while fetching {url}")]
    Canceled {
        /// The URL being fetched when cancellation was observed.
        url: String,
    },

    /// File system error during download (create file, write, rename, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed, or a redirect pointed somewhere unusable.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The redirect chase exceeded its hop limit.
    #[error("too many redirects fetching {url} (limit {limit})")]
    TooManyRedirects {
        /// The URL that started the chain.
        url: String,
        /// The hop limit that was exceeded.
        limit: usize,
    },

    /// A body read into memory exceeded its size bound.
    #[error("response from {url} exceeds {limit} bytes")]
    ResponseTooLarge {
        /// The URL whose body was too large.
        url: String,
        /// The size bound in bytes.
        limit: u64,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout or network error depending on what reqwest reported.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a cancellation error.
    pub fn canceled(url: impl Into<String>) -> Self {
        Self::Canceled { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a redirect-limit error.
    pub fn too_many_redirects(url: impl Into<String>, limit: usize) -> Self {
        Self::TooManyRedirects {
            url: url.into(),
            limit,
        }
    }

    /// Creates a body-size error.
    pub fn too_large(url: impl Into<String>, limit: u64) -> Self {
        Self::ResponseTooLarge {
            url: url.into(),
            limit,
        }
    }

    /// Returns true if the error was caused by cancellation or a timeout.
    #[must_use]
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Canceled { .. })
    }
}

// No From<reqwest::Error> / From<std::io::Error>: every variant needs a URL
// or path the source error does not carry.
