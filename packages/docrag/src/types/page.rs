//! Page rows and frontier lease data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted page: one canonicalized URL of the documentation tree and its
/// extracted markdown content.
///
/// Page rows double as the crawl frontier: a row with `crawl_count = 0` has
/// never been attempted, and the scheduler always prefers lower counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: Uuid,

    /// Canonical URL: lower-cased scheme and host, no fragment, no trailing
    /// slash.
    pub url: String,

    /// Clean markdown; empty until the first successful crawl.
    pub content: String,

    /// Number of times this URL has been leased for crawling. Monotonically
    /// non-decreasing; never rolled back on failure.
    pub crawl_count: i32,

    /// When the URL was last leased, or `None` for never-attempted rows.
    pub last_crawled_at: Option<DateTime<Utc>>,

    /// When chunking + embedding last committed for this page, or `None`.
    /// Set only inside the replace-chunks transaction, so a non-null value
    /// implies at least one chunk row exists.
    pub processed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A frontier lease handed out by the scheduler.
///
/// The lease is durable: the crawl counter has already been incremented by
/// the time this value exists, so a crash between lease and completion only
/// deprioritizes the URL, never loses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedUrl {
    pub url: String,
    pub crawl_count: i32,
}

/// Canonicalize a URL: lower-case scheme and host, strip the fragment and
/// any trailing slash on the path.
///
/// Returns `None` for unparseable input.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let mut parsed = url::Url::parse(raw).ok()?;
    parsed.set_fragment(None);
    // Url already lower-cases scheme and host during parsing.
    let trimmed = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(if trimmed.is_empty() { "/" } else { &trimmed });
    let mut out = parsed.to_string();
    // A bare origin serializes with a trailing slash; the frontier treats
    // "https://host" and "https://host/" as the same row.
    if parsed.path() == "/" && parsed.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    Some(out)
}
