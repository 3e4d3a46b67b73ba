//! Feed update orchestrator.
//!
//! This module provides the [`FeedUpdater`], which applies the fetch policy,
//! performs the request, parses the body and records the attempt in the
//! shared [`FeedHistory`].
//!
//! # Overview
//!
//! A batch update partitions feeds by lowercase host. Host groups run in
//! parallel up to `max_concurrency`; feeds within a group run one at a time
//! in input order, separated by the inter-feed delay whenever the previous
//! feed actually reached the network. No single feed failure aborts the
//! others: every feed gets a [`FeedUpdateContext`] back.
//!
//! # Example
//!
//! ```no_run
//! use feedcache_core::feed::Feed;
//! use feedcache_core::update::{FeedUpdater, UpdateOptions};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let updater = FeedUpdater::new(UpdateOptions::default())?;
//! let mut feeds = vec![Feed::new(Url::parse("https://example.com/feed.xml")?)];
//! let results = updater
//!     .update_feeds(&mut feeds, true, &CancellationToken::new())
//!     .await;
//! println!("{}: {}", feeds[0].name(), results[0].status);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{StreamExt, stream};
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::context::FeedUpdateContext;
use super::history::FeedHistory;
use super::options::{UpdateError, UpdateOptions};
use super::policy::{FetchPolicy, parse_retry_after};
use crate::download::{
    ConditionalHeaders, DownloadError, FailureKind, HttpClient, MAX_FEED_BYTES, classify_error,
    read_to_string,
};
use crate::feed::{Feed, FeedStatus, parse_feed};

/// What the final response of a feed request amounted to.
struct FetchedResponse {
    status: StatusCode,
    redirects: usize,
    validators: ConditionalHeaders,
    retry_after: Option<Duration>,
    /// Body of a 200 response.
    body: Option<String>,
}

/// Updates feeds while respecting conditional-fetch and rate-limit policy.
///
/// The updater owns the history table for its lifetime and is designed to be
/// reused across update cycles so the policy can see earlier attempts.
#[derive(Debug)]
pub struct FeedUpdater {
    options: UpdateOptions,
    policy: FetchPolicy,
    history: Arc<FeedHistory>,
    client: HttpClient,
    /// Client that skips certificate verification, built only when a
    /// relaxed host is configured.
    relaxed_client: Option<HttpClient>,
}

impl FeedUpdater {
    /// Creates an updater with an empty history.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError`] if the options are invalid or an HTTP client
    /// cannot be built.
    pub fn new(options: UpdateOptions) -> Result<Self, UpdateError> {
        Self::with_history(options, Arc::new(FeedHistory::new()))
    }

    /// Creates an updater that records into an existing history.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError`] if the options are invalid or an HTTP client
    /// cannot be built.
    #[instrument(skip_all, fields(max_concurrency = options.max_concurrency))]
    pub fn with_history(
        options: UpdateOptions,
        history: Arc<FeedHistory>,
    ) -> Result<Self, UpdateError> {
        options.validate()?;

        let mut settings = options.client_settings("");
        let client = HttpClient::with_settings(&settings)
            .map_err(|source| UpdateError::ClientBuild { source })?;
        let relaxed_client = if options.tls_relaxed_hosts.is_empty() {
            None
        } else {
            settings.tls_relaxed = true;
            Some(
                HttpClient::with_settings(&settings)
                    .map_err(|source| UpdateError::ClientBuild { source })?,
            )
        };

        debug!(
            relaxed_hosts = options.tls_relaxed_hosts.len(),
            "creating feed updater"
        );
        Ok(Self {
            policy: options.policy(),
            options,
            history,
            client,
            relaxed_client,
        })
    }

    /// The shared history table.
    #[must_use]
    pub fn history(&self) -> &Arc<FeedHistory> {
        &self.history
    }

    /// The options this updater was built with.
    #[must_use]
    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    /// Drops the history of `feed_uri`. Returns true if a record existed.
    pub fn forget(&self, feed_uri: &str) -> bool {
        self.history.remove(feed_uri)
    }

    /// Updates a single feed, bypassing host grouping.
    ///
    /// With `conditional`, validators from the previous attempt are sent and
    /// the Last-Modified cooldown applies; rate-limit and timeout throttles
    /// apply either way.
    pub async fn update_feed(
        &self,
        feed: &mut Feed,
        conditional: bool,
        cancel: &CancellationToken,
    ) -> FeedUpdateContext {
        let client = self.client_for(&host_key(feed.uri()));
        self.update_with(client, feed, conditional, cancel).await
    }

    /// Updates a batch of feeds, grouped by host.
    ///
    /// Results follow group completion order; within a group they follow
    /// input order.
    #[instrument(skip(self, feeds, cancel), fields(feeds = feeds.len()))]
    pub async fn update_feeds(
        &self,
        feeds: &mut [Feed],
        conditional: bool,
        cancel: &CancellationToken,
    ) -> Vec<FeedUpdateContext> {
        if let [feed] = feeds {
            return vec![self.update_feed(feed, conditional, cancel).await];
        }

        let groups = group_by_host(feeds);
        info!(
            groups = groups.len(),
            max_concurrency = self.options.max_concurrency,
            "updating feeds"
        );

        let results: Vec<Vec<FeedUpdateContext>> = stream::iter(groups)
            .map(|(host, group)| self.update_group(host, group, conditional, cancel))
            .buffer_unordered(self.options.max_concurrency)
            .collect()
            .await;
        results.into_iter().flatten().collect()
    }

    #[instrument(skip(self, feeds, conditional, cancel), fields(feeds = feeds.len()))]
    async fn update_group(
        &self,
        host: String,
        feeds: Vec<&mut Feed>,
        conditional: bool,
        cancel: &CancellationToken,
    ) -> Vec<FeedUpdateContext> {
        let client = self.client_for(&host);
        let delay = self.options.inter_feed_delay;
        let mut results = Vec::with_capacity(feeds.len());
        let mut previous_hit_network = false;

        for feed in feeds {
            if previous_hit_network && !delay.is_zero() {
                debug!(delay_ms = delay.as_millis(), "waiting before next request to host");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(delay) => {}
                }
            }
            let context = self.update_with(client, feed, conditional, cancel).await;
            previous_hit_network = !context.network_skipped;
            results.push(context);
        }
        results
    }

    fn client_for(&self, host: &str) -> &HttpClient {
        match &self.relaxed_client {
            Some(relaxed) if self.options.is_tls_relaxed(host) => relaxed,
            _ => &self.client,
        }
    }

    #[instrument(skip(self, client, feed, cancel), fields(feed = %feed.uri()))]
    async fn update_with(
        &self,
        client: &HttpClient,
        feed: &mut Feed,
        conditional: bool,
        cancel: &CancellationToken,
    ) -> FeedUpdateContext {
        let uri = feed.uri().as_str().to_string();
        let prior = self.history.get_or_new(&uri);
        feed.set_status(FeedStatus::Updating);

        let decision = self.policy.decide(&prior, Utc::now(), conditional);
        if let Some(status) = decision.skip_status() {
            debug!(?decision, status = %status, "skipping request");
            feed.set_status(status);
            let mut skipped = prior;
            skipped.status = status;
            skipped.network_skipped = true;
            return self.history.record(skipped);
        }

        let validators = if conditional {
            ConditionalHeaders {
                etag: prior.etag.clone(),
                last_modified: prior.last_modified,
            }
        } else {
            ConditionalHeaders::default()
        };

        let mut attempt = FeedUpdateContext::new(uri.clone());
        attempt.last_started = Some(Utc::now());
        attempt.rate_limit = prior.rate_limit.clone();

        let fetched = tokio::time::timeout(
            self.options.feed_timeout,
            fetch(client, feed.uri(), &validators, cancel),
        )
        .await
        .unwrap_or_else(|_| Err(DownloadError::timeout(uri.as_str())));
        let finished = Utc::now();
        attempt.last_finished = Some(finished);

        let status = match fetched {
            Ok(response) => {
                let code = response.status.as_u16();
                attempt.last_status_code = Some(code);
                attempt.redirects = response.redirects;
                attempt.rate_limit = self.policy.after_response(
                    &prior.rate_limit,
                    code,
                    response.retry_after,
                    finished,
                );
                apply_response(feed, response, &mut attempt)
            }
            Err(error) => {
                let kind = classify_error(&error);
                warn!(error = %error, ?kind, "feed request failed");
                attempt.last_failure = Some(kind);
                kind.feed_status()
            }
        };

        feed.set_status(status);
        attempt.status = status;
        info!(status = %status, new_items = attempt.new_items, "feed updated");
        self.history.record(attempt)
    }
}

/// Maps a response onto the feed and returns the resulting status.
fn apply_response(
    feed: &mut Feed,
    response: FetchedResponse,
    attempt: &mut FeedUpdateContext,
) -> FeedStatus {
    if response.status != StatusCode::OK {
        if response.status == StatusCode::NOT_MODIFIED {
            attempt.etag = response.validators.etag;
            attempt.last_modified = response.validators.last_modified;
        }
        return status_for_code(response.status);
    }

    let body = response.body.unwrap_or_default();
    match parse_feed(&body) {
        Ok(parsed) => {
            feed.set_name(parsed.title);
            attempt.new_items = feed.merge_items(parsed.items);
            attempt.etag = response.validators.etag;
            attempt.last_modified = response.validators.last_modified;
            debug!(dialect = ?parsed.dialect, new_items = attempt.new_items, "feed parsed");
            FeedStatus::Ok
        }
        Err(error) => {
            warn!(error = %error, "feed body could not be parsed");
            attempt.last_failure = Some(FailureKind::Parse);
            FeedStatus::ParseFailed
        }
    }
}

/// Sends the request and reads the body of a 200 response.
async fn fetch(
    client: &HttpClient,
    uri: &Url,
    validators: &ConditionalHeaders,
    cancel: &CancellationToken,
) -> Result<FetchedResponse, DownloadError> {
    let chain = client.get_with_redirects(uri, validators, cancel).await?;
    let redirects = chain.redirects();
    let response = chain.into_final();

    let status = response.status();
    let validators = ConditionalHeaders::from_response(&response);
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_retry_after(value, Utc::now()));

    let body = if status == StatusCode::OK {
        Some(read_to_string(response, MAX_FEED_BYTES, cancel).await?)
    } else {
        None
    };

    Ok(FetchedResponse {
        status,
        redirects,
        validators,
        retry_after,
        body,
    })
}

/// Feed status for a non-200 final response.
fn status_for_code(status: StatusCode) -> FeedStatus {
    match status.as_u16() {
        200 | 304 => FeedStatus::Ok,
        429 => FeedStatus::RateLimited,
        403 => FeedStatus::Forbidden,
        404 | 410 => FeedStatus::DoesNotExist,
        300..=399 => FeedStatus::MovedCannotFollow,
        _ => FeedStatus::Other,
    }
}

/// Lowercase host used to group feeds.
///
/// Returns "unknown" for URIs without a host so they still form a group.
#[must_use]
pub fn host_key(uri: &Url) -> String {
    uri.host_str()
        .map_or_else(|| "unknown".to_string(), str::to_lowercase)
}

/// Partitions feeds by host, preserving first-appearance order of hosts and
/// input order within each host.
fn group_by_host(feeds: &mut [Feed]) -> Vec<(String, Vec<&mut Feed>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&mut Feed>)> = Vec::new();
    for feed in feeds.iter_mut() {
        let host = host_key(feed.uri());
        let slot = *index.entry(host.clone()).or_insert_with(|| {
            groups.push((host, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(feed);
    }
    groups
}
