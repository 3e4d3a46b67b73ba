//! HTTP client wrapper with an explicit redirect chase.
//!
//! This module provides the `HttpClient` struct, which issues one logical GET
//! that may traverse redirects. reqwest's own redirect following is disabled
//! so every hop is visible to the caller as part of a [`RedirectChain`].

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, MAX_REDIRECTS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// Construction settings for an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Maximum idle time between body reads.
    pub read_timeout: Duration,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    /// Accept invalid or unverifiable certificates.
    ///
    /// Used for hosts whose certificate revocation checks are known to fail.
    pub tls_relaxed: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            user_agent: user_agent::default_user_agent(),
            tls_relaxed: false,
        }
    }
}

/// Validators sent with a conditional GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalHeaders {
    /// Sent as `If-None-Match`.
    pub etag: Option<String>,
    /// Sent as `If-Modified-Since`.
    pub last_modified: Option<DateTime<Utc>>,
}

impl ConditionalHeaders {
    /// Reads the `ETag` and `Last-Modified` validators from a response.
    #[must_use]
    pub fn from_response(response: &Response) -> Self {
        let headers = response.headers();
        let etag = headers
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| httpdate::parse_http_date(value.trim()).ok())
            .map(DateTime::<Utc>::from);
        Self {
            etag,
            last_modified,
        }
    }

    /// Returns true if no validator is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Ordered responses of one logical GET, first request to final answer.
///
/// Every response's body is still open; dropping the chain releases them.
#[derive(Debug)]
pub struct RedirectChain {
    hops: Vec<Response>,
    last: Response,
}

impl RedirectChain {
    /// Number of responses, including the final one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hops.len() + 1
    }

    /// Always false: a chain holds at least its final response.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of redirects that were followed.
    #[must_use]
    pub fn redirects(&self) -> usize {
        self.hops.len()
    }

    /// Status codes in request order.
    #[must_use]
    pub fn statuses(&self) -> Vec<StatusCode> {
        self.hops
            .iter()
            .chain(std::iter::once(&self.last))
            .map(Response::status)
            .collect()
    }

    /// The non-redirect response that ended the chase.
    #[must_use]
    pub fn final_response(&self) -> &Response {
        &self.last
    }

    /// Releases the redirect hops and returns the final response.
    #[must_use]
    pub fn into_final(self) -> Response {
        self.last
    }
}

/// HTTP client for feed and enclosure requests.
///
/// This client is designed to be created once and reused for many requests,
/// taking advantage of connection pooling.
///
/// # Example
///
/// ```no_run
/// use feedcache_core::download::{ConditionalHeaders, HttpClient};
/// use tokio_util::sync::CancellationToken;
/// use url::Url;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let url = Url::parse("https://example.com/feed.xml")?;
/// let chain = client
///     .get_with_redirects(&url, &ConditionalHeaders::default(), &CancellationToken::new())
///     .await?;
/// println!("final status {}", chain.final_response().status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default settings.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_settings(&ClientSettings::default())
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a client from explicit settings.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialized.
    #[instrument(level = "debug", skip(settings), fields(tls_relaxed = settings.tls_relaxed))]
    pub fn with_settings(settings: &ClientSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .redirect(Policy::none())
            .gzip(true)
            .user_agent(settings.user_agent.as_str())
            .danger_accept_invalid_certs(settings.tls_relaxed)
            .build()?;
        Ok(Self { client })
    }

    /// Sends a GET and follows redirects until a non-redirect response.
    ///
    /// A redirect is any 3xx other than 304 that carries a `Location`
    /// header; relative locations resolve against the URL that produced
    /// them. The validators in `conditional` are sent on every hop.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Canceled`] if `cancel` fires before a response arrives
    /// - [`DownloadError::Timeout`] / [`DownloadError::Network`] for transport failures
    /// - [`DownloadError::TooManyRedirects`] after [`MAX_REDIRECTS`] hops
    /// - [`DownloadError::InvalidUrl`] if a `Location` cannot be resolved to HTTP(S)
    #[instrument(skip(self, conditional, cancel), fields(url = %url))]
    pub async fn get_with_redirects(
        &self,
        url: &Url,
        conditional: &ConditionalHeaders,
        cancel: &CancellationToken,
    ) -> Result<RedirectChain, DownloadError> {
        let mut hops = Vec::new();
        let mut current = url.clone();

        loop {
            let response = self.send(&current, conditional, cancel).await?;
            let Some(next) = redirect_target(&response, &current)? else {
                debug!(
                    status = response.status().as_u16(),
                    redirects = hops.len(),
                    "request complete"
                );
                return Ok(RedirectChain {
                    hops,
                    last: response,
                });
            };

            hops.push(response);
            if hops.len() > MAX_REDIRECTS {
                return Err(DownloadError::too_many_redirects(url.as_str(), MAX_REDIRECTS));
            }
            debug!(from = %current, to = %next, "following redirect");
            current = next;
        }
    }

    async fn send(
        &self,
        url: &Url,
        conditional: &ConditionalHeaders,
        cancel: &CancellationToken,
    ) -> Result<Response, DownloadError> {
        let mut request = self.client.get(url.as_str());
        if let Some(etag) = &conditional.etag {
            request = request.header(IF_NONE_MATCH, etag.as_str());
        }
        if let Some(last_modified) = conditional.last_modified {
            request = request.header(
                IF_MODIFIED_SINCE,
                httpdate::fmt_http_date(SystemTime::from(last_modified)),
            );
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DownloadError::canceled(url.as_str())),
            result = request.send() => {
                result.map_err(|e| DownloadError::from_reqwest(url.as_str(), e))
            }
        }
    }
}

/// Resolves the next hop of a redirect, or `None` if `response` ends the chase.
fn redirect_target(response: &Response, current: &Url) -> Result<Option<Url>, DownloadError> {
    let status = response.status();
    if !status.is_redirection() || status == StatusCode::NOT_MODIFIED {
        return Ok(None);
    }
    let Some(location) = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };

    let next = current
        .join(location)
        .map_err(|_| DownloadError::invalid_url(location))?;
    if !matches!(next.scheme(), "http" | "https") {
        return Err(DownloadError::invalid_url(next.as_str()));
    }
    Ok(Some(next))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    use super::*;

    fn url(server: &MockServer, route: &str) -> Url {
        Url::parse(&format!("{}{route}", server.uri())).unwrap()
    }

    async fn get(url: Url) -> Result<RedirectChain, DownloadError> {
        HttpClient::new()
            .get_with_redirects(&url, &ConditionalHeaders::default(), &CancellationToken::new())
            .await
    }

    /// Matches requests whose header `name` equals `value` exactly.
    struct ExactHeader(&'static str, &'static str);

    impl Match for ExactHeader {
        fn matches(&self, request: &Request) -> bool {
            request
                .headers
                .get(self.0)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == self.1)
        }
    }

    #[tokio::test]
    async fn test_single_response_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .mount(&server)
            .await;

        let chain = get(url(&server, "/feed")).await.unwrap();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.redirects(), 0);
        assert_eq!(chain.final_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_relative_redirect_is_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let chain = get(url(&server, "/old")).await.unwrap();

        assert_eq!(chain.statuses(), vec![StatusCode::FOUND, StatusCode::OK]);
        assert_eq!(chain.final_response().url().path(), "/new");
    }

    #[tokio::test]
    async fn test_redirect_without_location_ends_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(301))
            .mount(&server)
            .await;

        let chain = get(url(&server, "/moved")).await.unwrap();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.final_response().status(), StatusCode::MOVED_PERMANENTLY);
    }

    #[tokio::test]
    async fn test_redirect_loop_hits_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(307).insert_header("Location", "/loop"))
            .expect(MAX_REDIRECTS as u64 + 1)
            .mount(&server)
            .await;

        let result = get(url(&server, "/loop")).await;

        assert!(matches!(
            result,
            Err(DownloadError::TooManyRedirects { limit: MAX_REDIRECTS, .. })
        ));
    }

    #[tokio::test]
    async fn test_conditional_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(ExactHeader("If-None-Match", "\"abc\""))
            .and(ExactHeader("If-Modified-Since", "Sat, 01 Jun 2024 12:00:00 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let conditional = ConditionalHeaders {
            etag: Some("\"abc\"".to_string()),
            last_modified: Some("2024-06-01T12:00:00Z".parse().unwrap()),
        };
        let chain = HttpClient::new()
            .get_with_redirects(&url(&server, "/feed"), &conditional, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(chain.final_response().status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_validators_read_from_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"v2\"")
                    .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
            )
            .mount(&server)
            .await;

        let chain = get(url(&server, "/feed")).await.unwrap();
        let validators = ConditionalHeaders::from_response(chain.final_response());

        assert_eq!(validators.etag.as_deref(), Some("\"v2\""));
        assert_eq!(
            validators.last_modified,
            Some("2015-10-21T07:28:00Z".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_canceled_before_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = HttpClient::new()
            .get_with_redirects(&url(&server, "/slow"), &ConditionalHeaders::default(), &cancel)
            .await;

        assert!(matches!(result, Err(DownloadError::Canceled { .. })));
    }

    #[test]
    fn test_default_settings_use_crate_user_agent() {
        let settings = ClientSettings::default();
        assert!(settings.user_agent.starts_with("feedcache/"));
        assert!(!settings.tls_relaxed);
    }
}
