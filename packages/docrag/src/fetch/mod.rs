//! Page fetching and link discovery.
//!
//! The [`Fetcher`] trait is the seam to the rendering engine: the engine
//! must present as a real desktop browser (full navigation header set,
//! automation suppression, a ~3 s settle delay after DOMContentLoaded) and
//! honor a 15 s total per-page deadline. [`StealthFetcher`] is the bundled
//! HTTP implementation; a JS-rendering engine can be swapped in behind the
//! same trait.

mod stealth;

pub use stealth::{FetcherConfig, StealthFetcher};

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use crate::error::FetchResult;
use crate::types::page::canonicalize_url;

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub html: String,
    /// Canonicalized same-origin URLs under the documentation prefix,
    /// duplicates collapsed.
    pub discovered_urls: Vec<String>,
    pub fetch_duration: Duration,
}

/// Retrieves rendered HTML for one URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedPage>;
}

/// Extract outbound documentation links from a page.
///
/// Keeps anchors that resolve to the same origin as `base` and whose
/// canonical form starts with `allowed_prefix`; fragments, mail/js links and
/// duplicates are dropped. Returns a sorted, deduplicated list.
pub fn discover_links(html: &str, base: &Url, allowed_prefix: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let anchors = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    let mut found = std::collections::BTreeSet::new();
    for element in document.select(&anchors) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if resolved.origin() != base.origin() {
            continue;
        }
        let Some(canonical) = canonicalize_url(resolved.as_str()) else {
            continue;
        };
        if canonical.starts_with(allowed_prefix) {
            found.insert(canonical);
        }
    }

    found.into_iter().collect()
}
