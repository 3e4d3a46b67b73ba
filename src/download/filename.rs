//! Filename derivation and path resolution for downloads.
//!
//! This module derives safe filenames from enclosure URLs and computes the
//! in-progress and failure paths that surround a download's final path.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use url::Url;

use super::constants::PARTIAL_SUFFIX;

/// Suffix given to an in-progress file that did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSuffix {
    /// The server answered with a non-success status; the file holds its body.
    Error,
    /// The download was canceled or timed out.
    Canceled,
    /// A transport or file system failure interrupted the download.
    Failed,
}

impl FailureSuffix {
    /// File extension used for this failure.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }
}

/// Path a download streams into before it is finalized: `<final>.partial`.
#[must_use]
pub fn partial_path(destination: &Path) -> PathBuf {
    with_suffix(destination, PARTIAL_SUFFIX)
}

/// Path an incomplete download is preserved under.
///
/// `<final>.<suffix>` if free, otherwise `<final>.1.<suffix>`,
/// `<final>.2.<suffix>`, and so on.
#[must_use]
pub fn failure_path(destination: &Path, suffix: FailureSuffix) -> PathBuf {
    let suffix = suffix.as_str();
    let base_path = with_suffix(destination, suffix);
    if !base_path.exists() {
        return base_path;
    }

    for i in 1..1000 {
        let candidate = with_suffix(destination, &format!("{i}.{suffix}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    // Fallback (extremely unlikely)
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    with_suffix(destination, &format!("{timestamp}.{suffix}"))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Derives a filename from the last path segment of `url`.
///
/// The segment is percent-decoded and sanitized; URLs without a usable
/// segment fall back to `download_<timestamp>.bin`.
#[must_use]
pub fn filename_from_url(url: &Url) -> String {
    if let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
            debug!(
                segment = %last,
                error = %e,
                "URL decoding failed, using raw segment"
            );
            last.into()
        });
        let sanitized = sanitize_filename(&decoded);
        if !sanitized.trim_matches('_').is_empty() {
            return sanitized;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("download_{timestamp}.bin")
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
