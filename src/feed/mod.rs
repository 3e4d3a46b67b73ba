//! Feed model and parsing.
//!
//! This module holds the caller-facing feed objects ([`Feed`], [`Item`],
//! [`Enclosure`]), the Atom/RSS parser and the feed list reader.
//!
//! # Example
//!
//! ```
//! use feedcache_core::feed::{FeedDialect, parse_feed};
//!
//! let parsed = parse_feed(
//!     r#"<rss version="2.0"><channel><title>News</title>
//!        <item><title>Hello</title><link>https://example.com/hello</link></item>
//!        </channel></rss>"#,
//! )
//! .unwrap();
//! assert_eq!(parsed.dialect, FeedDialect::Rss);
//! assert_eq!(parsed.title, "News");
//! assert_eq!(parsed.items.len(), 1);
//! ```

mod collection;
mod date;
mod error;
mod list;
mod model;
mod parser;
mod xml;

pub use collection::{FeedEvent, FeedSet};
pub use date::parse_timestamp;
pub use error::FeedParseError;
pub use list::{parse_feed_line, read_feed_list};
pub use model::{
    Enclosure, FEED_TITLE_FALLBACK, Feed, FeedStatus, ITEM_TITLE_FALLBACK, Item, UNKNOWN_PUBLISHED,
};
pub use parser::{FeedDialect, ParsedFeed, parse_feed, sanitize_title};
