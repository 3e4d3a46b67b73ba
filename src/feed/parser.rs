//! Atom/RSS document parsing into feed items.
//!
//! Both dialects share one extraction path; the [`FeedDialect`] tag only
//! decides where entries live and what they are called.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use url::Url;

use super::date::parse_timestamp;
use super::error::FeedParseError;
use super::model::{
    Enclosure, FEED_TITLE_FALLBACK, ITEM_TITLE_FALLBACK, Item, UNKNOWN_PUBLISHED,
};
use super::xml::{Element, parse_document};

/// Publish date elements, in preference order.
const DATE_ELEMENTS: [&str; 3] = ["pubDate", "published", "updated"];

/// Feed dialect detected from the root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedDialect {
    /// Root `<feed>`; entries are `<entry>`.
    Atom,
    /// Root `<rss>`; items are `<channel><item>`.
    Rss,
    /// Anything else.
    Unknown,
}

impl FeedDialect {
    /// Detects the dialect from the root element's local name.
    #[must_use]
    pub fn from_root(local_name: &str) -> Self {
        match local_name {
            "feed" => Self::Atom,
            "rss" => Self::Rss,
            _ => Self::Unknown,
        }
    }

    fn entry_name(self) -> &'static str {
        match self {
            Self::Atom => "entry",
            Self::Rss | Self::Unknown => "item",
        }
    }
}

/// A successfully parsed feed document.
#[derive(Debug)]
pub struct ParsedFeed {
    /// Detected dialect (never [`FeedDialect::Unknown`]).
    pub dialect: FeedDialect,
    /// Sanitized feed title, or the fallback.
    pub title: String,
    /// Entries in document order.
    pub items: Vec<Item>,
}

/// Parses a feed document.
///
/// # Errors
///
/// Returns [`FeedParseError`] when the body is not XML, the root element is
/// not a known dialect, or an RSS document lacks its channel.
#[instrument(level = "debug", skip(body), fields(bytes = body.len()))]
pub fn parse_feed(body: &str) -> Result<ParsedFeed, FeedParseError> {
    let root = parse_document(body)?;
    let dialect = FeedDialect::from_root(root.name());

    let container = match dialect {
        FeedDialect::Atom => &root,
        FeedDialect::Rss => root.child("channel").ok_or(FeedParseError::MissingChannel)?,
        FeedDialect::Unknown => {
            return Err(FeedParseError::UnknownDialect {
                root: root.name().to_string(),
            });
        }
    };

    let title = extract_title(container).unwrap_or_else(|| FEED_TITLE_FALLBACK.to_string());
    let items: Vec<Item> = container
        .children_named(dialect.entry_name())
        .map(extract_item)
        .collect();

    debug!(?dialect, items = items.len(), "parsed feed document");
    Ok(ParsedFeed {
        dialect,
        title,
        items,
    })
}

fn extract_item(entry: &Element) -> Item {
    let name = extract_title(entry).unwrap_or_else(|| ITEM_TITLE_FALLBACK.to_string());
    let link = extract_link(entry).unwrap_or_default();
    let published = extract_published(entry);
    let enclosure = extract_enclosure(entry);
    Item::new(name, link, published, enclosure)
}

/// First `title` child that is non-empty after sanitizing.
fn extract_title(element: &Element) -> Option<String> {
    element
        .children_named("title")
        .map(|title| sanitize_title(title.text()))
        .find(|title| !title.is_empty())
}

fn extract_link(entry: &Element) -> Option<String> {
    let link = entry.child("link")?;
    let text = link.text().trim();
    if Url::parse(text).is_ok() {
        return Some(text.to_string());
    }
    link.attribute("href")
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .map(str::to_string)
}

fn extract_published(entry: &Element) -> DateTime<Utc> {
    DATE_ELEMENTS
        .into_iter()
        .flat_map(|name| entry.children_named(name))
        .find_map(|element| parse_timestamp(element.text()))
        .unwrap_or(UNKNOWN_PUBLISHED)
}

fn extract_enclosure(entry: &Element) -> Option<Enclosure> {
    let element = entry.children().iter().find(|child| {
        child.name() == "enclosure"
            || (child.name() == "link" && child.attribute("rel") == Some("enclosure"))
    })?;
    let link = element
        .attribute("url")
        .or_else(|| element.attribute("href"))
        .map(str::trim)
        .filter(|link| !link.is_empty())?;
    let declared_size = element
        .attribute("length")
        .and_then(|length| length.trim().parse::<u64>().ok());
    Some(Enclosure::new(link, declared_size))
}

/// Strips symbol-only glyphs and control characters, collapses whitespace.
#[must_use]
pub fn sanitize_title(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !is_symbol_glyph(*c))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pictographs, dingbats and friends that render as decoration rather than text.
fn is_symbol_glyph(c: char) -> bool {
    matches!(c,
        '\u{2190}'..='\u{21FF}'     // arrows
        | '\u{2300}'..='\u{23FF}'   // misc technical
        | '\u{2500}'..='\u{27BF}'   // box drawing, shapes, misc symbols, dingbats
        | '\u{2900}'..='\u{297F}'   // supplemental arrows
        | '\u{2B00}'..='\u{2BFF}'   // misc symbols and arrows
        | '\u{E000}'..='\u{F8FF}'   // private use
        | '\u{FE00}'..='\u{FE0F}'   // variation selectors
        | '\u{200D}'                // zero-width joiner
        | '\u{1F000}'..='\u{1FAFF}' // mahjong .. symbols and pictographs extended
        | '\u{E0020}'..='\u{E007F}' // tag characters
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>  Example 🎉 Feed  </title>
  <entry>
    <title>First</title>
    <link href="https://example.com/posts/1" rel="alternate"/>
    <link rel="enclosure" href="https://cdn.example.com/1.mp3" length="1234"/>
    <updated>2024-01-02T10:00:00Z</updated>
    <published>2024-01-01T10:00:00Z</published>
  </entry>
  <entry>
    <title></title>
    <title>   </title>
    <link href="https://example.com/posts/2"/>
  </entry>
</feed>"#;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Radio</title>
    <item>
      <title>Episode 1</title>
      <link>https://radio.example.com/ep/1</link>
      <pubDate>Wed, 11 Jun 2003 04:00:00 EDT</pubDate>
      <enclosure url="https://radio.example.com/ep1.mp3" length="not-a-number" type="audio/mpeg"/>
    </item>
    <item>
      <title>Episode 2</title>
      <link>https://radio.example.com/ep/2</link>
      <pubDate>sometime</pubDate>
      <enclosure url="https://radio.example.com/ep2.mp3" length="0"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_dialect_from_root() {
        assert_eq!(FeedDialect::from_root("feed"), FeedDialect::Atom);
        assert_eq!(FeedDialect::from_root("rss"), FeedDialect::Rss);
        assert_eq!(FeedDialect::from_root("RDF"), FeedDialect::Unknown);
    }

    #[test]
    fn test_parse_atom_feed() {
        let parsed = parse_feed(ATOM).unwrap();
        assert_eq!(parsed.dialect, FeedDialect::Atom);
        assert_eq!(parsed.title, "Example Feed");
        assert_eq!(parsed.items.len(), 2);

        let first = &parsed.items[0];
        assert_eq!(first.name(), "First");
        assert_eq!(first.link(), "https://example.com/posts/1");
        // <published> wins over the earlier <updated>
        assert_eq!(
            first.published(),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
        let enclosure = first.enclosure().unwrap();
        assert_eq!(enclosure.link(), "https://cdn.example.com/1.mp3");
        assert_eq!(enclosure.declared_size(), Some(1234));
    }

    #[test]
    fn test_parse_atom_item_fallbacks() {
        let parsed = parse_feed(ATOM).unwrap();
        let second = &parsed.items[1];
        assert_eq!(second.name(), ITEM_TITLE_FALLBACK);
        assert_eq!(second.published(), UNKNOWN_PUBLISHED);
        assert!(second.enclosure().is_none());
    }

    #[test]
    fn test_parse_rss_feed() {
        let parsed = parse_feed(RSS).unwrap();
        assert_eq!(parsed.dialect, FeedDialect::Rss);
        assert_eq!(parsed.title, "Radio");
        assert_eq!(parsed.items.len(), 2);

        let first = &parsed.items[0];
        assert_eq!(first.link(), "https://radio.example.com/ep/1");
        assert_eq!(
            first.published(),
            Utc.with_ymd_and_hms(2003, 6, 11, 8, 0, 0).unwrap()
        );
        let enclosure = first.enclosure().unwrap();
        assert_eq!(enclosure.declared_size(), None, "unparsable length is unknown");
    }

    #[test]
    fn test_parse_rss_zero_length_is_distinct_from_unknown() {
        let parsed = parse_feed(RSS).unwrap();
        let second = &parsed.items[1];
        assert_eq!(second.published(), UNKNOWN_PUBLISHED);
        assert_eq!(second.enclosure().unwrap().declared_size(), Some(0));
    }

    #[test]
    fn test_parse_rss_without_channel_fails() {
        assert_eq!(
            parse_feed("<rss version=\"2.0\"></rss>").unwrap_err(),
            FeedParseError::MissingChannel
        );
    }

    #[test]
    fn test_parse_unknown_root_fails() {
        let err = parse_feed("<html><body/></html>").unwrap_err();
        assert!(matches!(err, FeedParseError::UnknownDialect { root } if root == "html"));
    }

    #[test]
    fn test_parse_malformed_xml_fails() {
        assert!(matches!(
            parse_feed("<rss><channel>").unwrap_err(),
            FeedParseError::Xml { .. }
        ));
    }

    #[test]
    fn test_missing_feed_title_uses_fallback() {
        let parsed = parse_feed("<rss><channel><item><title>x</title></item></channel></rss>")
            .unwrap();
        assert_eq!(parsed.title, FEED_TITLE_FALLBACK);
    }

    #[test]
    fn test_link_text_must_be_absolute_else_href() {
        let parsed = parse_feed(
            r#"<feed><entry><link href="https://example.com/h">relative/path</link></entry></feed>"#,
        )
        .unwrap();
        assert_eq!(parsed.items[0].link(), "https://example.com/h");
    }

    #[test]
    fn test_pub_date_preferred_over_updated() {
        let parsed = parse_feed(
            "<feed><entry><updated>2020-01-01T00:00:00Z</updated>\
             <pubDate>2021-01-01T00:00:00Z</pubDate></entry></feed>",
        )
        .unwrap();
        assert_eq!(
            parsed.items[0].published(),
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_unparseable_preferred_date_falls_through_to_next_element() {
        let parsed = parse_feed(
            "<feed><entry><published>garbage</published>\
             <updated>2020-01-01T00:00:00Z</updated></entry></feed>",
        )
        .unwrap();
        assert_eq!(
            parsed.items[0].published(),
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_sanitize_title_strips_symbols_and_controls() {
        assert_eq!(sanitize_title("\u{2605} Star\tNews \u{1F680}\n"), "Star News");
        assert_eq!(sanitize_title("🎉🎉"), "");
        assert_eq!(sanitize_title("Ünïcödé – text"), "Ünïcödé – text");
    }
}
