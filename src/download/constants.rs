//! Constants for the download module (timeouts, limits, progress cadence).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Maximum number of redirect hops followed for one logical GET.
pub const MAX_REDIRECTS: usize = 10;

/// Upper bound for a feed body read into memory (10 MiB).
pub const MAX_FEED_BYTES: u64 = 10 * 1024 * 1024;

/// Pause between the final flush and the rename of a completed download.
pub const FINALIZE_GRACE: Duration = Duration::from_millis(100);

/// Suffix of the file a download streams into before it is finalized.
pub const PARTIAL_SUFFIX: &str = "partial";

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Bytes between progress reports for the given content length.
///
/// Small known bodies report every 64 KiB, medium or unknown ones every
/// 1 MiB, and bodies of 100 MiB or more every 10 MiB.
#[must_use]
pub fn progress_threshold(content_length: Option<u64>) -> u64 {
    match content_length {
        Some(length) if length < MIB => 64 * KIB,
        Some(length) if length >= 100 * MIB => 10 * MIB,
        _ => MIB,
    }
}
