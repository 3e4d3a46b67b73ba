//! Error types for feed document parsing.

use thiserror::Error;

/// Reasons a response body could not be turned into a feed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedParseError {
    /// The body is not well-formed XML.
    #[error("malformed XML: {reason}")]
    Xml {
        /// Parser message, including position when available.
        reason: String,
    },

    /// The root element is neither `feed` (Atom) nor `rss`.
    #[error("unrecognized feed dialect with root element <{root}>")]
    UnknownDialect {
        /// Local name of the root element.
        root: String,
    },

    /// An RSS document without its `channel` element.
    #[error("RSS document has no <channel> element")]
    MissingChannel,
}

impl FeedParseError {
    /// Creates an XML syntax error.
    pub fn xml(reason: impl Into<String>) -> Self {
        Self::Xml {
            reason: reason.into(),
        }
    }
}
