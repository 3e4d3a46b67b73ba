//! Body streaming: responses into strings or files.
//!
//! File downloads never hold the whole body in memory. They write through
//! `<final>.partial`, report progress at a bounded rate, and only rename to
//! the final path after the stream completed and was flushed. An interrupted
//! download is preserved under a failure suffix (see [`FailureSuffix`]).

use std::fmt;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Response;
use reqwest::header::CONTENT_LENGTH;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::constants::{FINALIZE_GRACE, progress_threshold};
use super::error::DownloadError;
use super::filename::{FailureSuffix, failure_path, partial_path};

/// Progress of a file download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes written to disk so far.
    pub bytes_written: u64,
    /// Total size announced by the server, if any.
    pub content_length: Option<u64>,
}

impl DownloadProgress {
    /// Percentage complete, when the total size is known.
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        let total = self.content_length.filter(|total| *total > 0)?;
        let percent = self.bytes_written.saturating_mul(100) / total;
        Some(u8::try_from(percent.min(100)).unwrap_or(100))
    }
}

impl fmt::Display for DownloadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.percent(), self.content_length) {
            (Some(percent), Some(total)) => {
                write!(f, "{percent}% ({} of {total} bytes)", self.bytes_written)
            }
            _ => write!(f, "{} bytes", self.bytes_written),
        }
    }
}

/// A file download that did not complete.
#[derive(Debug)]
pub struct StreamFailure {
    /// What went wrong.
    pub error: DownloadError,
    /// Where the incomplete body was preserved, if anything was kept.
    pub preserved_at: Option<PathBuf>,
    /// Bytes written before the failure.
    pub bytes_written: u64,
}

/// Returns the `Content-Length` of a response, if announced.
#[must_use]
pub fn content_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Reads a response body into a string, bounded at `limit` bytes.
///
/// Invalid UTF-8 is replaced rather than rejected; a leading byte-order
/// mark is dropped.
///
/// # Errors
///
/// - [`DownloadError::ResponseTooLarge`] if the body exceeds `limit`
/// - [`DownloadError::Canceled`] if `cancel` fires mid-read
/// - [`DownloadError::Timeout`] / [`DownloadError::Network`] for transport failures
#[instrument(skip(response, cancel), fields(url = %response.url()))]
pub async fn read_to_string(
    response: Response,
    limit: u64,
    cancel: &CancellationToken,
) -> Result<String, DownloadError> {
    let url = response.url().to_string();
    if content_length(&response).is_some_and(|length| length > limit) {
        return Err(DownloadError::too_large(url, limit));
    }

    let mut body: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::canceled(url)),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|e| DownloadError::from_reqwest(url.as_str(), e))?;
        if body.len() as u64 + chunk.len() as u64 > limit {
            return Err(DownloadError::too_large(url, limit));
        }
        body.extend_from_slice(&chunk);
    }

    let text = match String::from_utf8(body) {
        Ok(text) => text,
        Err(error) => {
            debug!("body is not valid UTF-8, replacing invalid sequences");
            String::from_utf8_lossy(error.as_bytes()).into_owned()
        }
    };
    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

/// Streams a response body to `destination` through an in-progress file.
///
/// `progress` is called each time another threshold's worth of bytes has
/// been written (see [`progress_threshold`]) and once more on completion.
///
/// # Errors
///
/// Returns a [`StreamFailure`] if the body could not be written completely.
/// Nothing is ever left at `destination` in that case; the partial body is
/// renamed to `.canceled` (cancellation or timeout) or `.failed`.
#[instrument(skip(response, cancel, progress), fields(url = %response.url(), path = %destination.display()))]
pub async fn stream_to_file<F>(
    response: Response,
    destination: &Path,
    cancel: &CancellationToken,
    mut progress: F,
) -> Result<u64, StreamFailure>
where
    F: FnMut(DownloadProgress) + Send,
{
    let partial = partial_path(destination);
    let (bytes_written, result) = write_body(response, &partial, cancel, &mut progress).await;

    let result = match result {
        Ok(()) => finalize(&partial, destination, cancel).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(()) => {
            info!(bytes = bytes_written, "download complete");
            Ok(bytes_written)
        }
        Err(error) => {
            let suffix = if error.is_interruption() {
                FailureSuffix::Canceled
            } else {
                FailureSuffix::Failed
            };
            let preserved_at = preserve(&partial, destination, suffix).await;
            warn!(
                error = %error,
                bytes = bytes_written,
                preserved_at = ?preserved_at,
                "download did not complete"
            );
            Err(StreamFailure {
                error,
                preserved_at,
                bytes_written,
            })
        }
    }
}

/// Stores the body of a non-success response next to `destination` as `.error`.
///
/// # Errors
///
/// Returns the error that prevented the body from being kept; whatever was
/// written is still preserved under `.canceled` or `.failed`.
#[instrument(skip(response, cancel), fields(status = response.status().as_u16(), path = %destination.display()))]
pub async fn preserve_error_response(
    response: Response,
    destination: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf, StreamFailure> {
    let partial = partial_path(destination);
    let (bytes_written, result) =
        write_body(response, &partial, cancel, &mut |_: DownloadProgress| {}).await;

    let suffix = match &result {
        Ok(()) => FailureSuffix::Error,
        Err(error) if error.is_interruption() => FailureSuffix::Canceled,
        Err(_) => FailureSuffix::Failed,
    };
    let preserved_at = preserve(&partial, destination, suffix).await;

    match (result, preserved_at) {
        (Ok(()), Some(path)) => Ok(path),
        (Ok(()), None) => Err(StreamFailure {
            error: DownloadError::io(
                partial,
                std::io::Error::other("failed to preserve error response"),
            ),
            preserved_at: None,
            bytes_written,
        }),
        (Err(error), preserved_at) => Err(StreamFailure {
            error,
            preserved_at,
            bytes_written,
        }),
    }
}

/// Writes the body into `partial`, returning bytes written and the outcome.
///
/// Buffered data is flushed even when the stream fails, so an interrupted
/// file holds exactly the bytes that reached it.
async fn write_body(
    response: Response,
    partial: &Path,
    cancel: &CancellationToken,
    progress: &mut (dyn FnMut(DownloadProgress) + Send),
) -> (u64, Result<(), DownloadError>) {
    let url = response.url().to_string();
    let total = content_length(&response);
    let threshold = progress_threshold(total);

    let file = match File::create(partial).await {
        Ok(file) => file,
        Err(e) => return (0, Err(DownloadError::io(partial, e))),
    };
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;
    let mut since_report: u64 = 0;

    let outcome = loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => break Err(DownloadError::canceled(url.as_str())),
            chunk = stream.next() => chunk,
        };
        let chunk = match chunk {
            None => break Ok(()),
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => break Err(DownloadError::from_reqwest(url.as_str(), e)),
        };

        if let Err(e) = writer.write_all(&chunk).await {
            break Err(DownloadError::io(partial, e));
        }
        bytes_written += chunk.len() as u64;
        since_report += chunk.len() as u64;

        if since_report >= threshold {
            since_report = 0;
            progress(DownloadProgress {
                bytes_written,
                content_length: total,
            });
        }
    };

    if let Err(e) = writer.flush().await {
        debug!(error = %e, "flush failed");
        if outcome.is_ok() {
            return (bytes_written, Err(DownloadError::io(partial, e)));
        }
    }
    if outcome.is_ok() {
        progress(DownloadProgress {
            bytes_written,
            content_length: total,
        });
    }
    (bytes_written, outcome)
}

/// Waits out the grace period and moves the completed file into place.
async fn finalize(
    partial: &Path,
    destination: &Path,
    cancel: &CancellationToken,
) -> Result<(), DownloadError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return Err(DownloadError::canceled(destination.display().to_string()));
        }
        () = tokio::time::sleep(FINALIZE_GRACE) => {}
    }
    tokio::fs::rename(partial, destination)
        .await
        .map_err(|e| DownloadError::io(destination, e))
}

/// Renames the in-progress file to its failure name.
async fn preserve(partial: &Path, destination: &Path, suffix: FailureSuffix) -> Option<PathBuf> {
    let target = failure_path(destination, suffix);
    match tokio::fs::rename(partial, &target).await {
        Ok(()) => Some(target),
        Err(e) => {
            debug!(error = %e, path = %partial.display(), "could not preserve partial file");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn respond(template: ResponseTemplate) -> (MockServer, Response) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(template)
            .mount(&server)
            .await;
        let response = reqwest::get(format!("{}/body", server.uri())).await.unwrap();
        (server, response)
    }

    #[test]
    fn test_progress_display() {
        let known = DownloadProgress {
            bytes_written: 512,
            content_length: Some(2048),
        };
        assert_eq!(known.percent(), Some(25));
        assert_eq!(known.to_string(), "25% (512 of 2048 bytes)");

        let unknown = DownloadProgress {
            bytes_written: 512,
            content_length: None,
        };
        assert_eq!(unknown.percent(), None);
        assert_eq!(unknown.to_string(), "512 bytes");
    }

    #[tokio::test]
    async fn test_read_to_string_strips_bom() {
        let (_server, response) =
            respond(ResponseTemplate::new(200).set_body_bytes(b"\xEF\xBB\xBF<rss/>".to_vec())).await;
        let body = read_to_string(response, 1024, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(body, "<rss/>");
    }

    #[tokio::test]
    async fn test_read_to_string_enforces_limit() {
        let (_server, response) =
            respond(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096])).await;
        let result = read_to_string(response, 1024, &CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(DownloadError::ResponseTooLarge { limit: 1024, .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_to_file_renames_on_completion() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("episode.mp3");
        let body = vec![7u8; 200 * 1024];
        let (_server, response) = respond(ResponseTemplate::new(200).set_body_bytes(body.clone())).await;

        let mut reports = Vec::new();
        let bytes = stream_to_file(response, &destination, &CancellationToken::new(), |p| {
            reports.push(p);
        })
        .await
        .unwrap();

        assert_eq!(bytes, body.len() as u64);
        assert_eq!(std::fs::read(&destination).unwrap(), body);
        assert!(!partial_path(&destination).exists());
        let last = reports.last().unwrap();
        assert_eq!(last.bytes_written, body.len() as u64);
        assert_eq!(last.percent(), Some(100));
        // at least one 64 KiB threshold report plus the final one
        assert!(reports.len() >= 2, "got {reports:?}");
    }

    #[tokio::test]
    async fn test_canceled_stream_preserves_partial_as_canceled() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("episode.mp3");
        let (_server, response) =
            respond(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 1024])).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let failure = stream_to_file(response, &destination, &cancel, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(failure.error, DownloadError::Canceled { .. }));
        assert!(!destination.exists());
        assert!(!partial_path(&destination).exists());
        let preserved = failure.preserved_at.unwrap();
        assert_eq!(preserved, temp_dir.path().join("episode.mp3.canceled"));
        let kept = std::fs::metadata(&preserved).unwrap().len();
        assert!(kept <= failure.bytes_written);
    }

    #[tokio::test]
    async fn test_preserve_error_response_keeps_body() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("episode.mp3");
        std::fs::write(temp_dir.path().join("episode.mp3.error"), b"older").unwrap();
        let (_server, response) =
            respond(ResponseTemplate::new(503).set_body_string("try later")).await;

        let preserved = preserve_error_response(response, &destination, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(preserved, temp_dir.path().join("episode.mp3.1.error"));
        assert_eq!(std::fs::read_to_string(preserved).unwrap(), "try later");
        assert!(!destination.exists());
    }
}
