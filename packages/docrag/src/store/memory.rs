//! In-memory storage implementation for testing and development.
//!
//! Mirrors the Postgres semantics (counter-ordered leasing, atomic chunk
//! replacement, cosine nearest-neighbor, term-frequency keyword scoring)
//! without a database. Not suitable for production: data is lost on
//! restart and the frontier is process-local.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use super::{normalize_scores, ChunkStore, FrontierStore, SearchStore};
use crate::embedding::cosine_similarity;
use crate::error::{StoreError, StoreResult};
use crate::types::{BreakType, LeasedUrl, NewChunk, SearchHit};

#[derive(Debug, Clone)]
struct PageEntry {
    content: String,
    crawl_count: i32,
    last_crawled_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    /// Insertion order stands in for `created_at` tie-breaking.
    inserted: u64,
}

#[derive(Debug, Clone)]
struct StoredChunk {
    id: Uuid,
    page_url: String,
    ordinal: i32,
    content: String,
    #[allow(dead_code)]
    break_type: BreakType,
    embedding: Vec<f32>,
}

/// In-memory store with the same observable behavior as [`super::PostgresStore`].
#[derive(Default)]
pub struct MemoryStore {
    pages: RwLock<HashMap<String, PageEntry>>,
    chunks: RwLock<Vec<StoredChunk>>,
    counter: RwLock<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_count(&self) -> usize {
        self.pages.read().unwrap().len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().unwrap().len()
    }

    /// Crawl counter for a URL; `None` when the page is unknown.
    pub fn crawl_count(&self, url: &str) -> Option<i32> {
        self.pages.read().unwrap().get(url).map(|p| p.crawl_count)
    }

    /// Stored content for a URL.
    pub fn content(&self, url: &str) -> Option<String> {
        self.pages.read().unwrap().get(url).map(|p| p.content.clone())
    }

    pub fn is_processed(&self, url: &str) -> bool {
        self.pages
            .read()
            .unwrap()
            .get(url)
            .is_some_and(|p| p.processed_at.is_some())
    }

    /// Ordinals of a page's chunks, in storage order.
    pub fn ordinals(&self, url: &str) -> Vec<i32> {
        self.chunks
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.page_url == url)
            .map(|c| c.ordinal)
            .collect()
    }

    /// Seed a chunk row directly, bypassing the pipeline. Test helper.
    pub fn seed_chunk(&self, id: Uuid, page_url: &str, content: &str, embedding: Vec<f32>) {
        self.chunks.write().unwrap().push(StoredChunk {
            id,
            page_url: page_url.to_string(),
            ordinal: 0,
            content: content.to_string(),
            break_type: BreakType::Paragraph,
            embedding,
        });
    }

    /// Spread of crawl counters across the frontier, for fairness checks.
    pub fn crawl_count_spread(&self) -> Option<(i32, i32)> {
        let pages = self.pages.read().unwrap();
        let min = pages.values().map(|p| p.crawl_count).min()?;
        let max = pages.values().map(|p| p.crawl_count).max()?;
        Some((min, max))
    }
}

#[async_trait]
impl FrontierStore for MemoryStore {
    async fn insert_url(&self, url: &str) -> StoreResult<bool> {
        let mut pages = self.pages.write().unwrap();
        if pages.contains_key(url) {
            return Ok(false);
        }
        let mut counter = self.counter.write().unwrap();
        *counter += 1;
        pages.insert(
            url.to_string(),
            PageEntry {
                content: String::new(),
                crawl_count: 0,
                last_crawled_at: None,
                processed_at: None,
                inserted: *counter,
            },
        );
        Ok(true)
    }

    async fn insert_urls(&self, urls: &[String]) -> StoreResult<u64> {
        let mut added = 0;
        for url in urls {
            if self.insert_url(url).await? {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn lease_batch(&self, limit: i64) -> StoreResult<Vec<LeasedUrl>> {
        let mut pages = self.pages.write().unwrap();

        let mut order: Vec<(String, i32, Option<DateTime<Utc>>, u64)> = pages
            .iter()
            .map(|(url, p)| (url.clone(), p.crawl_count, p.last_crawled_at, p.inserted))
            .collect();
        // crawl_count ASC, last_crawled_at ASC NULLS FIRST, insertion order.
        order.sort_by(|a, b| {
            a.1.cmp(&b.1)
                .then(match (a.2, b.2) {
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (Some(x), Some(y)) => x.cmp(&y),
                })
                .then(a.3.cmp(&b.3))
        });

        let mut leased = Vec::new();
        for (url, _, _, _) in order.into_iter().take(limit.max(0) as usize) {
            let entry = pages.get_mut(&url).expect("page exists");
            entry.crawl_count += 1;
            entry.last_crawled_at = Some(Utc::now());
            leased.push(LeasedUrl {
                url,
                crawl_count: entry.crawl_count,
            });
        }
        Ok(leased)
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn replace_chunks(
        &self,
        page_url: &str,
        content: &str,
        chunks: &[NewChunk],
    ) -> StoreResult<()> {
        for (expected, chunk) in chunks.iter().enumerate() {
            if chunk.ordinal != expected as i32 {
                return Err(StoreError::Integrity(format!(
                    "non-contiguous ordinals for {page_url}: expected {expected}, got {}",
                    chunk.ordinal
                )));
            }
        }

        // Both collections mutate under write locks held together, matching
        // the transactional write path.
        let mut pages = self.pages.write().unwrap();
        let mut stored = self.chunks.write().unwrap();

        stored.retain(|c| c.page_url != page_url);
        for chunk in chunks {
            stored.push(StoredChunk {
                id: Uuid::new_v4(),
                page_url: page_url.to_string(),
                ordinal: chunk.ordinal,
                content: chunk.content.clone(),
                break_type: chunk.break_type,
                embedding: chunk.embedding.clone(),
            });
        }

        if let Some(entry) = pages.get_mut(page_url) {
            entry.content = content.to_string();
            entry.processed_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl SearchStore for MemoryStore {
    async fn nearest(&self, query_vec: &[f32], k: usize) -> StoreResult<Vec<SearchHit>> {
        let chunks = self.chunks.read().unwrap();
        let mut hits: Vec<SearchHit> = chunks
            .iter()
            .map(|c| SearchHit {
                chunk_id: c.id,
                url: c.page_url.clone(),
                content: c.content.clone(),
                similarity: cosine_similarity(query_vec, &c.embedding),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn keyword(&self, query: &str, k: usize) -> StoreResult<Vec<SearchHit>> {
        let chunks = self.chunks.read().unwrap();
        let mut hits: Vec<SearchHit> = chunks
            .iter()
            .filter_map(|c| {
                let score = keyword_match(query, &c.content);
                (score > 0.0).then(|| SearchHit {
                    chunk_id: c.id,
                    url: c.page_url.clone(),
                    content: c.content.clone(),
                    similarity: score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        normalize_scores(&mut hits);
        Ok(hits)
    }
}

/// Fraction of query terms present in the text. Stands in for `ts_rank`.
fn keyword_match(query: &str, text: &str) -> f32 {
    let query_lower = query.to_lowercase();
    let terms: Vec<&str> = query_lower
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let text_lower = text.to_lowercase();
    let matches = terms.iter().filter(|t| text_lower.contains(**t)).count();
    matches as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(ordinal: i32, content: &str, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            ordinal,
            content: content.to_string(),
            break_type: BreakType::Paragraph,
            char_start: 0,
            char_end: content.len() as i32,
            embedding,
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = MemoryStore::new();
        assert!(store.insert_url("https://d/a").await.unwrap());
        assert!(!store.insert_url("https://d/a").await.unwrap());
        assert_eq!(store.page_count(), 1);
    }

    #[tokio::test]
    async fn test_lease_orders_by_crawl_count_then_age() {
        let store = MemoryStore::new();
        store.insert_url("https://d/a").await.unwrap();
        store.insert_url("https://d/b").await.unwrap();

        // First lease takes both never-crawled rows.
        let first = store.lease_batch(10).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|l| l.crawl_count == 1));

        // A fresh URL jumps ahead of the already-crawled ones.
        store.insert_url("https://d/new").await.unwrap();
        let second = store.lease_batch(1).await.unwrap();
        assert_eq!(second[0].url, "https://d/new");
    }

    #[tokio::test]
    async fn test_lease_never_rolls_back() {
        let store = MemoryStore::new();
        store.insert_url("https://d/a").await.unwrap();
        store.lease_batch(1).await.unwrap();
        // No completion ever happens; the counter still advanced.
        assert_eq!(store.crawl_count("https://d/a"), Some(1));
    }

    #[tokio::test]
    async fn test_replace_chunks_swaps_whole_set() {
        let store = MemoryStore::new();
        store.insert_url("https://d/a").await.unwrap();

        store
            .replace_chunks(
                "https://d/a",
                "v1",
                &[chunk(0, "one", vec![1.0, 0.0]), chunk(1, "two", vec![0.0, 1.0])],
            )
            .await
            .unwrap();
        assert_eq!(store.ordinals("https://d/a"), vec![0, 1]);
        assert!(store.is_processed("https://d/a"));

        store
            .replace_chunks("https://d/a", "v2", &[chunk(0, "only", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.ordinals("https://d/a"), vec![0]);
        assert_eq!(store.content("https://d/a").unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_replace_chunks_rejects_ordinal_gaps() {
        let store = MemoryStore::new();
        store.insert_url("https://d/a").await.unwrap();
        let result = store
            .replace_chunks("https://d/a", "v1", &[chunk(1, "gap", vec![1.0])])
            .await;
        assert!(matches!(result, Err(StoreError::Integrity(_))));
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn test_nearest_orders_by_similarity() {
        let store = MemoryStore::new();
        store.seed_chunk(Uuid::from_u128(1), "https://d/a", "a", vec![1.0, 0.0]);
        store.seed_chunk(Uuid::from_u128(2), "https://d/b", "b", vec![0.0, 1.0]);
        store.seed_chunk(Uuid::from_u128(3), "https://d/c", "c", vec![0.9, 0.1]);

        let hits = store.nearest(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, Uuid::from_u128(1));
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].chunk_id, Uuid::from_u128(3));
    }

    #[tokio::test]
    async fn test_keyword_scores_normalized() {
        let store = MemoryStore::new();
        store.seed_chunk(
            Uuid::from_u128(1),
            "https://d/a",
            "navigation stack in swiftui",
            vec![1.0],
        );
        store.seed_chunk(Uuid::from_u128(2), "https://d/b", "core data basics", vec![1.0]);

        let hits = store.keyword("swiftui navigation", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, Uuid::from_u128(1));
        assert_eq!(hits[0].similarity, 1.0);
    }
}
