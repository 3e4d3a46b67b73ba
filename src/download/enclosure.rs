//! Enclosure downloads.
//!
//! [`EnclosureDownloader`] resolves an enclosure link through the redirect
//! chase and streams the final body to disk, mirroring progress into the
//! enclosure's message.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::classify::{FailureKind, classify_error};
use super::client::{ConditionalHeaders, HttpClient};
use super::error::DownloadError;
use super::stream::{DownloadProgress, preserve_error_response, stream_to_file};
use crate::feed::Enclosure;

/// Result of one enclosure download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The body was written to `path`.
    Completed {
        /// Final path of the downloaded file.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
    },
    /// The destination already existed; no request was made.
    AlreadyExists,
    /// Another download of this enclosure is in flight.
    AlreadyDownloading,
    /// The server answered with a non-success status.
    HttpError {
        /// HTTP status code of the final response.
        status: u16,
        /// Where the response body was kept (`.error`).
        preserved_at: Option<PathBuf>,
    },
    /// The download failed before completing.
    Failed {
        /// Failure classification.
        kind: FailureKind,
        /// Where the partial body was kept (`.failed`, or `.canceled` for timeouts).
        preserved_at: Option<PathBuf>,
    },
    /// The caller canceled the download.
    Canceled {
        /// Where the partial body was kept (`.canceled`).
        preserved_at: Option<PathBuf>,
    },
}

impl DownloadOutcome {
    /// Returns true if the file is now at its final path.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Clears the enclosure's downloading flag when the download ends.
struct DownloadingGuard<'a>(&'a Enclosure);

impl Drop for DownloadingGuard<'_> {
    fn drop(&mut self) {
        self.0.end_download();
    }
}

/// Downloads enclosures to local files.
#[derive(Debug, Clone, Default)]
pub struct EnclosureDownloader {
    client: HttpClient,
}

impl EnclosureDownloader {
    /// Creates a downloader that sends requests through `client`.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Downloads `enclosure` to `destination`.
    ///
    /// An existing `destination` is never overwritten, and at most one
    /// download per enclosure runs at a time. `progress` receives bytes
    /// written and the announced length at a bounded rate.
    #[instrument(skip(self, enclosure, cancel, progress), fields(link = enclosure.link(), path = %destination.display()))]
    pub async fn download<F>(
        &self,
        enclosure: &Enclosure,
        destination: &Path,
        cancel: &CancellationToken,
        mut progress: F,
    ) -> DownloadOutcome
    where
        F: FnMut(DownloadProgress) + Send,
    {
        if tokio::fs::try_exists(destination).await.unwrap_or(false) {
            debug!("destination exists, skipping");
            enclosure.set_message("already downloaded");
            return DownloadOutcome::AlreadyExists;
        }
        if !enclosure.try_begin_download() {
            debug!("download already in progress");
            return DownloadOutcome::AlreadyDownloading;
        }
        let _guard = DownloadingGuard(enclosure);
        enclosure.set_message("starting download");

        let outcome = self
            .fetch(enclosure, destination, cancel, &mut progress)
            .await;
        enclosure.set_message(describe(&outcome));
        outcome
    }

    async fn fetch<F>(
        &self,
        enclosure: &Enclosure,
        destination: &Path,
        cancel: &CancellationToken,
        progress: &mut F,
    ) -> DownloadOutcome
    where
        F: FnMut(DownloadProgress) + Send,
    {
        let Ok(url) = Url::parse(enclosure.link()) else {
            warn!("enclosure link is not a valid URL");
            return failed(&DownloadError::invalid_url(enclosure.link()), None);
        };

        let chain = match self
            .client
            .get_with_redirects(&url, &ConditionalHeaders::default(), cancel)
            .await
        {
            Ok(chain) => chain,
            Err(error) => return failed(&error, None),
        };
        let response = chain.into_final();

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "enclosure request failed");
            let preserved_at = preserve_error_response(response, destination, cancel)
                .await
                .map_or_else(|failure| failure.preserved_at, Some);
            return DownloadOutcome::HttpError {
                status: status.as_u16(),
                preserved_at,
            };
        }

        let result = stream_to_file(response, destination, cancel, |update| {
            enclosure.set_message(update.to_string());
            progress(update);
        })
        .await;

        match result {
            Ok(bytes) => {
                info!(bytes, "enclosure downloaded");
                DownloadOutcome::Completed {
                    path: destination.to_path_buf(),
                    bytes,
                }
            }
            Err(failure) => failed(&failure.error, failure.preserved_at),
        }
    }
}

fn failed(error: &DownloadError, preserved_at: Option<PathBuf>) -> DownloadOutcome {
    match classify_error(error) {
        FailureKind::Canceled => DownloadOutcome::Canceled { preserved_at },
        kind => DownloadOutcome::Failed { kind, preserved_at },
    }
}

fn describe(outcome: &DownloadOutcome) -> String {
    match outcome {
        DownloadOutcome::Completed { bytes, .. } => format!("downloaded {bytes} bytes"),
        DownloadOutcome::AlreadyExists => "already downloaded".to_string(),
        DownloadOutcome::AlreadyDownloading => "download in progress".to_string(),
        DownloadOutcome::HttpError { status, .. } => format!("server answered HTTP {status}"),
        DownloadOutcome::Failed { kind, .. } => format!("download failed ({kind:?})"),
        DownloadOutcome::Canceled { .. } => "download canceled".to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_existing_destination_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("episode.mp3");
        std::fs::write(&destination, b"already here").unwrap();
        let enclosure = Enclosure::new(format!("{}/episode.mp3", server.uri()), None);

        let outcome = EnclosureDownloader::default()
            .download(&enclosure, &destination, &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(outcome, DownloadOutcome::AlreadyExists);
        assert_eq!(std::fs::read(&destination).unwrap(), b"already here");
    }

    #[tokio::test]
    async fn test_concurrent_download_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let enclosure = Enclosure::new("https://example.com/episode.mp3", None);
        assert!(enclosure.try_begin_download());

        let outcome = EnclosureDownloader::default()
            .download(
                &enclosure,
                &temp_dir.path().join("episode.mp3"),
                &CancellationToken::new(),
                |_| {},
            )
            .await;

        assert_eq!(outcome, DownloadOutcome::AlreadyDownloading);
        assert!(enclosure.is_downloading(), "the first download keeps its flag");
    }

    #[tokio::test]
    async fn test_invalid_link_fails_without_request() {
        let temp_dir = TempDir::new().unwrap();
        let enclosure = Enclosure::new("not a url", None);

        let outcome = EnclosureDownloader::default()
            .download(
                &enclosure,
                &temp_dir.path().join("x.bin"),
                &CancellationToken::new(),
                |_| {},
            )
            .await;

        assert_eq!(
            outcome,
            DownloadOutcome::Failed {
                kind: FailureKind::InvalidUrl,
                preserved_at: None
            }
        );
        assert!(!enclosure.is_downloading());
    }

    #[test]
    fn test_describe_outcomes() {
        assert_eq!(
            describe(&DownloadOutcome::Completed {
                path: PathBuf::from("/tmp/a"),
                bytes: 10
            }),
            "downloaded 10 bytes"
        );
        assert_eq!(
            describe(&DownloadOutcome::HttpError {
                status: 404,
                preserved_at: None
            }),
            "server answered HTTP 404"
        );
    }
}
