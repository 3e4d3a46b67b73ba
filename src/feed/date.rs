//! Best-effort, deterministic parsing of feed timestamps.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Zone-less layouts read as UTC after the standard formats fail.
const NAIVE_LAYOUTS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%a, %d %b %Y %H:%M",
    "%d %b %Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parses a feed timestamp.
///
/// Tries RFC 2822, RFC 3339 and a few zone-less layouts. If none match, the
/// trailing four characters are stripped once and the attempt repeated, which
/// recovers dates ending in a timezone abbreviation chrono does not know
/// (`" BST"`, `" IST"`).
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    parse_known(value).or_else(|| {
        let cut = value.char_indices().rev().nth(3).map(|(index, _)| index)?;
        parse_known(value[..cut].trim_end())
    })
}

fn parse_known(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, layout) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}
