//! Stealth HTTP fetcher.
//!
//! Presents as a real desktop browser: complete navigation header set
//! (Accept, Accept-Language, Accept-Encoding, client hints, Sec-Fetch-* for
//! a top-level navigation, Upgrade-Insecure-Requests) under a pinned
//! desktop User-Agent. Outbound requests are rate-limited, transient
//! failures retried with exponential backoff, and challenge pages detected
//! heuristically.
//!
//! This implementation does not execute JavaScript; `render_delay` is the
//! settle time a rendering engine must apply after DOMContentLoaded and is
//! carried in the config for such an engine to honor.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, warn};
use url::Url;

use super::{discover_links, FetchedPage, Fetcher};
use crate::config::CrawlerConfig;
use crate::error::{FetchError, FetchResult};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36 Edg/138.0.0.0";

/// Bodies shorter than this are screened for anti-bot markers.
const CHALLENGE_BODY_MAX: usize = 500;

const CHALLENGE_MARKERS: &[&str] = &[
    "Just a moment",
    "Access Denied",
    "Verifying you are human",
    "captcha",
    "CAPTCHA",
    "unusual traffic",
    "Cloudflare",
];

const MAX_ATTEMPTS: u32 = 3;

/// Fetcher settings; a slice of [`CrawlerConfig`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Canonical documentation-tree prefix; discovered links outside it are
    /// dropped.
    pub allowed_prefix: String,
    pub page_timeout: Duration,
    /// DOMContentLoaded settle time for rendering engines behind the same
    /// trait. Unused by the plain HTTP path.
    pub render_delay: Duration,
    pub requests_per_second: u32,
}

impl FetcherConfig {
    pub fn from_crawler(config: &CrawlerConfig) -> Self {
        Self {
            // Discovered links are compared in canonical form, so the
            // prefix must be canonical too.
            allowed_prefix: crate::types::page::canonicalize_url(&config.target_url)
                .unwrap_or_else(|| config.target_url.clone()),
            page_timeout: config.page_timeout,
            render_delay: config.render_delay,
            requests_per_second: config.requests_per_second,
        }
    }
}

/// HTTP fetcher with browser-grade headers, rate limiting and retry.
pub struct StealthFetcher {
    client: reqwest::Client,
    limiter: Arc<DefaultRateLimiter>,
    config: FetcherConfig,
}

impl StealthFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.page_timeout)
            .user_agent(USER_AGENT)
            .default_headers(stealth_headers())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("Failed to create HTTP client");

        let rps = NonZeroU32::new(config.requests_per_second.max(1))
            .expect("requests_per_second is at least 1");

        Self {
            client,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            config,
        }
    }

    async fn fetch_once(&self, url: &str) -> FetchResult<FetchedPage> {
        self.limiter.until_ready().await;

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport_error(url, &e))?;

        let status = response.status();
        if let Some(failure) = classify_status(url, status.as_u16()) {
            return Err(failure);
        }

        let final_url = response.url().clone();
        let html = response.text().await.map_err(|e| FetchError::Transient {
            url: url.to_string(),
            reason: format!("body read failed: {e}"),
        })?;

        if is_challenge_page(&html) {
            return Err(FetchError::Blocked {
                url: url.to_string(),
            });
        }

        let discovered_urls = discover_links(&html, &final_url, &self.config.allowed_prefix);

        Ok(FetchedPage {
            status: status.as_u16(),
            html,
            discovered_urls,
            fetch_duration: started.elapsed(),
        })
    }
}

#[async_trait]
impl Fetcher for StealthFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedPage> {
        // Reject URLs the client would choke on before spending a permit.
        Url::parse(url).map_err(|e| FetchError::Permanent {
            url: url.to_string(),
            reason: format!("invalid URL: {e}"),
        })?;

        let mut backoff = Duration::from_secs(1);
        let mut attempt = 1;
        loop {
            match self.fetch_once(url).await {
                Ok(page) => {
                    debug!(
                        url = %url,
                        status = page.status,
                        links = page.discovered_urls.len(),
                        duration_ms = page.fetch_duration.as_millis() as u64,
                        "page fetched"
                    );
                    return Ok(page);
                }
                Err(failure) if failure.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(url = %url, attempt, error = %failure, "fetch failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(failure) => return Err(failure),
            }
        }
    }
}

fn stealth_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let entries = [
        ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8"),
        ("Accept-Encoding", "gzip, deflate, br"),
        ("Accept-Language", "en-US,en;q=0.9"),
        ("Cache-Control", "no-cache"),
        ("Pragma", "no-cache"),
        ("Sec-CH-UA", "\"Not)A;Brand\";v=\"8\", \"Chromium\";v=\"138\", \"Microsoft Edge\";v=\"138\""),
        ("Sec-CH-UA-Mobile", "?0"),
        ("Sec-CH-UA-Platform", "\"macOS\""),
        ("Sec-Fetch-Dest", "document"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "none"),
        ("Sec-Fetch-User", "?1"),
        ("Upgrade-Insecure-Requests", "1"),
    ];
    for (name, value) in entries {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
    headers
}

fn classify_transport_error(url: &str, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() || error.is_connect() {
        FetchError::Transient {
            url: url.to_string(),
            reason: error.to_string(),
        }
    } else {
        FetchError::Permanent {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

/// Map an HTTP status to a failure class; `None` for success.
fn classify_status(url: &str, status: u16) -> Option<FetchError> {
    match status {
        200..=299 => None,
        429 | 500..=599 => Some(FetchError::Transient {
            url: url.to_string(),
            reason: format!("HTTP {status}"),
        }),
        _ => Some(FetchError::Permanent {
            url: url.to_string(),
            reason: format!("HTTP {status}"),
        }),
    }
}

/// Challenge heuristic: a suspiciously short body carrying an anti-bot
/// marker.
fn is_challenge_page(body: &str) -> bool {
    body.chars().count() < CHALLENGE_BODY_MAX
        && CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}
