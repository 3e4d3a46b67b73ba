//! Line-oriented feed list input.
//!
//! One absolute HTTP(S) URI per line; `#` starts a comment line. Blank,
//! malformed and non-HTTP lines are dropped without error.

use std::io::BufRead;

use tracing::debug;
use url::Url;

/// Reads feed URIs from a line-oriented source.
///
/// Lines that cannot be read (invalid UTF-8, I/O error) end the input early,
/// keeping every URI accepted so far.
pub fn read_feed_list<R: BufRead>(reader: R) -> Vec<Url> {
    let mut uris = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let Ok(line) = line else {
            debug!(line = index + 1, "stopping feed list at unreadable line");
            break;
        };
        if let Some(uri) = parse_feed_line(&line) {
            uris.push(uri);
        }
    }
    uris
}

/// Parses a single feed list line.
#[must_use]
pub fn parse_feed_line(line: &str) -> Option<Url> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match Url::parse(line) {
        Ok(uri) if matches!(uri.scheme(), "http" | "https") && uri.host_str().is_some() => {
            Some(uri)
        }
        _ => {
            debug!(line, "dropping malformed feed line");
            None
        }
    }
}
