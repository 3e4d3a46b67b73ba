//! Caller-supplied settings for feed updates.

use std::time::Duration;

use super::context::{BackoffIncrease, BackoffRecovery};
use super::policy::{DEFAULT_INITIAL_BACKOFF, FetchPolicy};
use crate::download::ClientSettings;
use crate::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::user_agent;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default number of host groups updated in parallel.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default pause between two requests to the same host.
pub const DEFAULT_INTER_FEED_DELAY: Duration = Duration::from_secs(1);

/// Default time budget for one feed (request, redirects and body).
pub const DEFAULT_FEED_TIMEOUT: Duration = Duration::from_secs(60);

/// Default delay before a feed that timed out is tried again.
pub const DEFAULT_TIMEOUT_COOLDOWN: Duration = Duration::from_secs(15 * 60);

/// Error type for feed update operations.
///
/// These are contract errors; individual feed failures are reported through
/// feed status, never through this type.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// A timeout setting was zero.
    #[error("invalid {name}: must be greater than zero")]
    InvalidTimeout {
        /// Which setting was invalid.
        name: &'static str,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

/// Settings for a [`FeedUpdater`](super::FeedUpdater).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Host groups updated in parallel (1–100).
    pub max_concurrency: usize,
    /// Pause between consecutive network requests to one host.
    pub inter_feed_delay: Duration,
    /// Time budget for one feed update.
    pub feed_timeout: Duration,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Maximum idle time between body reads.
    pub read_timeout: Duration,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    /// Backoff growth on each new 429.
    pub backoff_increase: BackoffIncrease,
    /// Backoff behavior once a limited feed answers normally.
    pub backoff_recovery: BackoffRecovery,
    /// Backoff applied on the first 429.
    pub initial_backoff: Duration,
    /// Delay before a feed that timed out is tried again; `None` disables.
    pub timeout_cooldown: Option<Duration>,
    /// Hosts whose certificates are not verified (exact host or subdomain).
    pub tls_relaxed_hosts: Vec<String>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_CONCURRENCY,
            inter_feed_delay: DEFAULT_INTER_FEED_DELAY,
            feed_timeout: DEFAULT_FEED_TIMEOUT,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            user_agent: user_agent::default_user_agent(),
            backoff_increase: BackoffIncrease::default(),
            backoff_recovery: BackoffRecovery::default(),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            timeout_cooldown: Some(DEFAULT_TIMEOUT_COOLDOWN),
            tls_relaxed_hosts: Vec::new(),
        }
    }
}

impl UpdateOptions {
    /// Checks the options for contract violations.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidConcurrency`] for a concurrency outside
    /// 1–100 and [`UpdateError::InvalidTimeout`] for a zero timeout.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.max_concurrency) {
            return Err(UpdateError::InvalidConcurrency {
                value: self.max_concurrency,
            });
        }
        for (name, value) in [
            ("feed timeout", self.feed_timeout),
            ("connect timeout", self.connect_timeout),
            ("read timeout", self.read_timeout),
        ] {
            if value.is_zero() {
                return Err(UpdateError::InvalidTimeout { name });
            }
        }
        Ok(())
    }

    /// Rate-limit and conditional-fetch policy derived from these options.
    #[must_use]
    pub fn policy(&self) -> FetchPolicy {
        FetchPolicy {
            increase: self.backoff_increase,
            recovery: self.backoff_recovery,
            initial_backoff: self.initial_backoff,
            timeout_cooldown: self.timeout_cooldown.filter(|delay| !delay.is_zero()),
        }
    }

    /// Client settings for requests to `host`.
    #[must_use]
    pub fn client_settings(&self, host: &str) -> ClientSettings {
        ClientSettings {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            user_agent: self.user_agent.clone(),
            tls_relaxed: self.is_tls_relaxed(host),
        }
    }

    /// Returns true if `host` equals or is a subdomain of a relaxed host.
    #[must_use]
    pub fn is_tls_relaxed(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.tls_relaxed_hosts.iter().any(|relaxed| {
            let relaxed = relaxed.trim().trim_start_matches('.').to_lowercase();
            !relaxed.is_empty()
                && (host == relaxed
                    || host
                        .strip_suffix(relaxed.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.')))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = UpdateOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.max_concurrency, 4);
        assert_eq!(options.inter_feed_delay, Duration::from_secs(1));
        assert_eq!(options.timeout_cooldown, Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_concurrency_bounds() {
        for value in [0, 101] {
            let options = UpdateOptions {
                max_concurrency: value,
                ..UpdateOptions::default()
            };
            let err = options.validate().unwrap_err();
            assert!(matches!(err, UpdateError::InvalidConcurrency { value: v } if v == value));
        }
        let options = UpdateOptions {
            max_concurrency: 100,
            ..UpdateOptions::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let options = UpdateOptions {
            feed_timeout: Duration::ZERO,
            ..UpdateOptions::default()
        };
        let msg = options.validate().unwrap_err().to_string();
        assert!(msg.contains("feed timeout"), "got: {msg}");
    }

    #[test]
    fn test_tls_relaxed_matching() {
        let options = UpdateOptions {
            tls_relaxed_hosts: vec!["Example.com".to_string(), ".legacy.org".to_string()],
            ..UpdateOptions::default()
        };
        assert!(options.is_tls_relaxed("example.com"));
        assert!(options.is_tls_relaxed("feeds.example.com"));
        assert!(options.is_tls_relaxed("legacy.org"));
        assert!(!options.is_tls_relaxed("notexample.com"));
        assert!(!options.is_tls_relaxed("example.org"));
        assert!(options.client_settings("cdn.example.com").tls_relaxed);
        assert!(!options.client_settings("other.net").tls_relaxed);
    }

    #[test]
    fn test_zero_timeout_cooldown_disables_throttle() {
        let options = UpdateOptions {
            timeout_cooldown: Some(Duration::ZERO),
            ..UpdateOptions::default()
        };
        assert_eq!(options.policy().timeout_cooldown, None);
    }
}
