//! Continuous crawl scheduling.
//!
//! The frontier is the `pages` table; each tick leases a batch under the
//! skip-locked discipline and hands it to the ingestion processor in
//! bounded waves. Failed URLs are not retried here: their advanced crawl
//! counter deprioritizes them through ordinary ordering, which yields
//! exponential-ish backoff for free.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{CrawlerConfig, ProcessorConfig};
use crate::error::Result;
use crate::processor::IngestProcessor;
use crate::store::EngineStore;
use crate::types::page::canonicalize_url;

/// Scheduler knobs; a slice of the crawler/processor config.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Max URLs leased per tick.
    pub batch_size: i64,
    /// Global bound on in-flight per-URL pipelines.
    pub max_concurrent: usize,
    /// URLs processed concurrently per wave; the scheduler awaits each
    /// wave before leasing again.
    pub wave_size: usize,
    /// Sleep between ticks when the frontier is idle.
    pub crawl_interval: Duration,
}

impl SchedulerConfig {
    pub fn new(crawler: &CrawlerConfig, processor: &ProcessorConfig) -> Self {
        Self {
            batch_size: crawler.batch_size,
            max_concurrent: crawler.max_concurrent.max(1),
            wave_size: processor.batch_size.max(1),
            crawl_interval: crawler.crawl_interval,
        }
    }
}

/// Long-running crawl loop over a shared store and processor.
pub struct CrawlScheduler<S> {
    store: Arc<S>,
    processor: Arc<IngestProcessor<S>>,
    config: SchedulerConfig,
}

impl<S: EngineStore + 'static> CrawlScheduler<S> {
    pub fn new(store: Arc<S>, processor: Arc<IngestProcessor<S>>, config: SchedulerConfig) -> Self {
        Self {
            store,
            processor,
            config,
        }
    }

    /// Insert the crawl root into the frontier. New deployments start here;
    /// on restart the conflict-free insert is a no-op.
    pub async fn seed(&self, url: &str) -> Result<bool> {
        let canonical = canonicalize_url(url).ok_or_else(|| crate::error::EngineError::InvalidQuery {
            reason: format!("TARGET_URL is not a valid URL: {url}"),
        })?;
        let inserted = self.store.insert_url(&canonical).await?;
        if inserted {
            info!(url = %canonical, "seeded crawl frontier");
        }
        Ok(inserted)
    }

    /// One scheduling tick: lease a batch and process it in waves.
    /// Returns the number of URLs leased.
    pub async fn tick(&self) -> Result<usize> {
        let lease_limit = self.config.batch_size.min(self.config.max_concurrent as i64);
        let leased = self.store.lease_batch(lease_limit).await?;
        if leased.is_empty() {
            return Ok(0);
        }

        info!(batch = leased.len(), "dispatching leased batch");

        for wave in leased.chunks(self.config.wave_size) {
            let results = join_all(wave.iter().map(|lease| self.processor.process_url(&lease.url))).await;
            for (lease, result) in wave.iter().zip(results) {
                match result {
                    Ok(report) => {
                        info!(
                            url = %lease.url,
                            crawl_count = lease.crawl_count,
                            chunks = report.chunks,
                            discovered = report.discovered,
                            "url processed"
                        );
                    }
                    Err(failure) => {
                        // The lease already advanced the counter; the URL
                        // falls back in line without an explicit retry.
                        warn!(
                            url = %lease.url,
                            crawl_count = lease.crawl_count,
                            error = %failure,
                            "url abandoned for this cycle"
                        );
                    }
                }
            }
        }

        Ok(leased.len())
    }

    /// Run ticks until cancelled. In-flight waves drain before exit.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            max_concurrent = self.config.max_concurrent,
            wave_size = self.config.wave_size,
            "crawl scheduler started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let leased = match self.tick().await {
                Ok(count) => count,
                Err(failure) => {
                    error!(error = %failure, "scheduling tick failed");
                    0
                }
            };

            if leased == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.crawl_interval) => {}
                }
            }
        }

        info!("crawl scheduler stopped");
    }
}
