//! Default User-Agent for feed and enclosure requests.
//!
//! Servers that publish feeds often throttle anonymous clients; an
//! identifying agent with a contact URL lets operators reach us instead.

/// Project URL advertised in the User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/feedcache/feedcache";

/// Default User-Agent (`feedcache/<version> (+<url>)`).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("feedcache/{version} (feed-reader; +{PROJECT_UA_URL})")
}
