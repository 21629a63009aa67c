//! Persistence layer: frontier, chunks and search.
//!
//! The storage surface is split into focused traits so the pipeline, the
//! retrieval engine and the dashboard each depend on exactly what they use:
//! - [`FrontierStore`]: URL insertion and skip-locked leasing
//! - [`ChunkStore`]: the atomic replace-chunks write path
//! - [`SearchStore`]: vector, keyword and hybrid reads
//! - [`DashboardStore`]: read-only observation queries
//!
//! [`PostgresStore`] implements all four over sqlx + pgvector;
//! [`MemoryStore`] mirrors the same semantics in memory for tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{LeasedUrl, NewChunk, SearchHit};

/// Hybrid fusion weights: dense similarity dominates, lexical match breaks
/// vocabulary mismatches.
pub const VECTOR_WEIGHT: f32 = 0.7;
pub const LEXICAL_WEIGHT: f32 = 0.3;

/// Frontier operations. The `pages` table is the frontier; it survives
/// restarts and is shared between schedulers through row locks alone.
#[async_trait]
pub trait FrontierStore: Send + Sync {
    /// Insert a URL with `crawl_count = 0` unless it already exists.
    /// Returns true when a new row was created.
    async fn insert_url(&self, url: &str) -> StoreResult<bool>;

    /// Bulk insert; conflicts are ignored. Returns the number of new rows.
    async fn insert_urls(&self, urls: &[String]) -> StoreResult<u64>;

    /// Lease up to `limit` URLs: select least-crawled first (never-crawled
    /// before all others), skipping rows locked by concurrent schedulers,
    /// and increment `crawl_count`/`last_crawled_at` in the same statement.
    /// The increment is the lease; it is never rolled back.
    async fn lease_batch(&self, limit: i64) -> StoreResult<Vec<LeasedUrl>>;
}

/// Chunk mutation. The single write path for page content.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Atomically swap a page's chunk set: delete prior chunks, insert the
    /// new rows, update `content`/`processed_at`/`updated_at`. Either
    /// everything commits or the prior chunk set remains observable.
    async fn replace_chunks(
        &self,
        page_url: &str,
        content: &str,
        chunks: &[NewChunk],
    ) -> StoreResult<()>;
}

/// Retrieval reads over the chunk set.
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Up to `k` chunks by ascending cosine distance. `similarity` on the
    /// returned hits is `1 − distance`.
    async fn nearest(&self, query_vec: &[f32], k: usize) -> StoreResult<Vec<SearchHit>>;

    /// Up to `k` chunks by lexical match; `similarity` is min-max
    /// normalized into [0, 1].
    async fn keyword(&self, query: &str, k: usize) -> StoreResult<Vec<SearchHit>>;

    /// Union of vector and keyword candidates, deduplicated by chunk id and
    /// re-scored with the weighted fusion.
    async fn hybrid(&self, query_vec: &[f32], query: &str, k: usize) -> StoreResult<Vec<SearchHit>> {
        let vector_hits = self.nearest(query_vec, k).await?;
        let keyword_hits = self.keyword(query, k).await?;
        Ok(weighted_fusion(&vector_hits, &keyword_hits, k))
    }
}

/// Everything the ingestion side needs.
pub trait EngineStore: FrontierStore + ChunkStore + SearchStore {}

impl<T: FrontierStore + ChunkStore + SearchStore> EngineStore for T {}

/// Fuse vector and keyword results: `0.7·vector + 0.3·lexical`, ties broken
/// by vector score, then by chunk id for determinism.
///
/// A chunk found by only one side contributes zero on the other.
pub fn weighted_fusion(
    vector_hits: &[SearchHit],
    keyword_hits: &[SearchHit],
    k: usize,
) -> Vec<SearchHit> {
    struct Fused {
        hit: SearchHit,
        vector_score: f32,
        lexical_score: f32,
    }

    let mut by_id: HashMap<Uuid, Fused> = HashMap::new();

    for hit in vector_hits {
        by_id
            .entry(hit.chunk_id)
            .and_modify(|f| f.vector_score = hit.similarity)
            .or_insert(Fused {
                hit: hit.clone(),
                vector_score: hit.similarity,
                lexical_score: 0.0,
            });
    }
    for hit in keyword_hits {
        by_id
            .entry(hit.chunk_id)
            .and_modify(|f| f.lexical_score = hit.similarity)
            .or_insert(Fused {
                hit: hit.clone(),
                vector_score: 0.0,
                lexical_score: hit.similarity,
            });
    }

    let mut fused: Vec<Fused> = by_id.into_values().collect();
    for f in &mut fused {
        f.hit.similarity = VECTOR_WEIGHT * f.vector_score + LEXICAL_WEIGHT * f.lexical_score;
    }
    fused.sort_by(|a, b| {
        b.hit
            .similarity
            .partial_cmp(&a.hit.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.vector_score
                    .partial_cmp(&a.vector_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.hit.chunk_id.cmp(&b.hit.chunk_id))
    });

    fused.into_iter().take(k).map(|f| f.hit).collect()
}

/// Min-max normalize hit scores into [0, 1] in place. A constant score set
/// collapses to 1.0 (every hit matched equally well).
pub fn normalize_scores(hits: &mut [SearchHit]) {
    let Some(max) = hits
        .iter()
        .map(|h| h.similarity)
        .fold(None::<f32>, |acc, s| Some(acc.map_or(s, |m| m.max(s))))
    else {
        return;
    };
    let min = hits
        .iter()
        .map(|h| h.similarity)
        .fold(max, |acc, s| acc.min(s));
    let range = max - min;
    for hit in hits.iter_mut() {
        hit.similarity = if range > f32::EPSILON {
            (hit.similarity - min) / range
        } else {
            1.0
        };
    }
}

// ---------------------------------------------------------------------------
// Dashboard read models
// ---------------------------------------------------------------------------

/// Sort/search parameters for the pages listing.
#[derive(Debug, Clone, Default)]
pub struct PageListQuery {
    pub sort: Option<String>,
    pub descending: bool,
    pub search: Option<String>,
}

/// Pagination/search parameters for the chunks listing.
#[derive(Debug, Clone)]
pub struct ChunkListQuery {
    pub page: u64,
    pub size: u64,
    pub search: Option<String>,
}

impl Default for ChunkListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            size: 50,
            search: None,
        }
    }
}

/// One row of the pages listing.
#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    pub id: Uuid,
    pub url: String,
    pub content: String,
    pub crawl_count: i32,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the chunks listing.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkSummary {
    pub id: Uuid,
    pub page_url: String,
    pub ordinal: i32,
    pub content: String,
    pub break_type: String,
    pub created_at: DateTime<Utc>,
}

/// A page of chunk rows plus the total row count.
#[derive(Debug, Clone)]
pub struct ChunkListing {
    pub rows: Vec<ChunkSummary>,
    pub total: u64,
}

/// Aggregate counters for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub pages_count: u64,
    pub chunks_count: u64,
    pub pages_with_content: u64,
    pub pages_processed: u64,
}

/// Read-only observation queries.
#[async_trait]
pub trait DashboardStore: Send + Sync {
    async fn list_pages(&self, query: &PageListQuery) -> StoreResult<Vec<PageSummary>>;
    async fn list_chunks(&self, query: &ChunkListQuery) -> StoreResult<ChunkListing>;
    async fn stats(&self) -> StoreResult<StoreStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: u128, similarity: f32) -> SearchHit {
        SearchHit::new(Uuid::from_u128(id), format!("https://d/{id}"), "text", similarity)
    }

    #[test]
    fn test_fusion_weights_and_dedup() {
        let vector = vec![hit(1, 0.9), hit(2, 0.8)];
        let keyword = vec![hit(2, 1.0), hit(3, 0.5)];

        let fused = weighted_fusion(&vector, &keyword, 10);

        assert_eq!(fused.len(), 3);
        // Chunk 2 appears once, fused across both sides.
        assert_eq!(fused[0].chunk_id, Uuid::from_u128(2));
        assert!((fused[0].similarity - (0.7 * 0.8 + 0.3 * 1.0)).abs() < 1e-6);
        // Vector-only chunk 1: 0.7 * 0.9.
        assert_eq!(fused[1].chunk_id, Uuid::from_u128(1));
        assert!((fused[1].similarity - 0.63).abs() < 1e-6);
        // Keyword-only chunk 3: 0.3 * 0.5.
        assert_eq!(fused[2].chunk_id, Uuid::from_u128(3));
        assert!((fused[2].similarity - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_fusion_tie_broken_by_chunk_id() {
        // Identical scores on both sides; ordering must still be stable.
        let vector = vec![hit(2, 0.6), hit(1, 0.6)];
        let fused = weighted_fusion(&vector, &[], 10);
        assert_eq!(fused[0].chunk_id, Uuid::from_u128(1));
        assert_eq!(fused[1].chunk_id, Uuid::from_u128(2));
    }

    #[test]
    fn test_fusion_truncates_to_k() {
        let vector: Vec<_> = (0..10).map(|i| hit(i, 1.0 - i as f32 * 0.05)).collect();
        let fused = weighted_fusion(&vector, &[], 3);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].chunk_id, Uuid::from_u128(0));
    }

    #[test]
    fn test_normalize_scores() {
        let mut hits = vec![hit(1, 10.0), hit(2, 5.0), hit(3, 0.0)];
        normalize_scores(&mut hits);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!((hits[1].similarity - 0.5).abs() < 1e-6);
        assert!(hits[2].similarity.abs() < 1e-6);

        let mut flat = vec![hit(1, 2.0), hit(2, 2.0)];
        normalize_scores(&mut flat);
        assert_eq!(flat[0].similarity, 1.0);
        assert_eq!(flat[1].similarity, 1.0);

        normalize_scores(&mut []);
    }
}
