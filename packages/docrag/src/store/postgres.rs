//! PostgreSQL + pgvector storage backend.
//!
//! The pool is lazy (established on first use) and health-checked before
//! checkout; connections are held only for a single query or the
//! replace-chunks transaction. The frontier lease is one skip-locked
//! statement so concurrent schedulers never hand the same URL to two
//! workers.

use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};

use async_trait::async_trait;

use super::{
    normalize_scores, ChunkListQuery, ChunkListing, ChunkStore, ChunkSummary, DashboardStore,
    FrontierStore, PageListQuery, PageSummary, SearchStore, StoreStats,
};
use crate::config::{DatabaseConfig, VectorIndexMode};
use crate::error::{StoreError, StoreResult};
use crate::types::{LeasedUrl, NewChunk, SearchHit};

/// pgvector builds HNSW indexes for `vector` columns only up to this
/// dimension; above it the exact scan is the default.
const VECTOR_INDEX_DIM_LIMIT: usize = 2000;

/// Columns the pages listing may sort by.
const PAGE_SORT_COLUMNS: &[&str] = &[
    "url",
    "crawl_count",
    "last_crawled_at",
    "processed_at",
    "created_at",
    "updated_at",
];

pub struct PostgresStore {
    pool: PgPool,
    dimension: usize,
    index_mode: VectorIndexMode,
}

impl PostgresStore {
    /// Build a lazy pool over the configured database. No connection is
    /// opened until first use.
    pub fn connect(
        config: &DatabaseConfig,
        dimension: usize,
        index_mode: VectorIndexMode,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.pool_min)
            .max_connections(config.pool_max)
            .acquire_timeout(Duration::from_secs(30))
            .test_before_acquire(true)
            .connect_lazy(&config.dsn())?;

        Ok(Self {
            pool,
            dimension,
            index_mode,
        })
    }

    /// Wrap an existing pool (used by the server, which owns pool setup).
    pub fn new(pool: PgPool, dimension: usize, index_mode: VectorIndexMode) -> Self {
        Self {
            pool,
            dimension,
            index_mode,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotent schema bootstrap: extension, tables, indexes.
    ///
    /// The vector index follows the precision discipline: HNSW is built
    /// automatically only when the dimension fits the index limit; above it
    /// the approximate index exists solely as an explicit opt-in over a
    /// half-precision cast, and the default stays an exact scan.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                url TEXT UNIQUE NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                crawl_count INTEGER NOT NULL DEFAULT 0,
                last_crawled_at TIMESTAMPTZ,
                processed_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                page_url TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                content TEXT NOT NULL,
                break_type TEXT NOT NULL,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL,
                embedding vector({dim}) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            dim = self.dimension
        ))
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_pages_crawl_order ON pages (crawl_count, last_crawled_at)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_page_url ON chunks (page_url)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_content_fts ON chunks USING GIN (to_tsvector('english', content))",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        match (self.index_mode, self.dimension <= VECTOR_INDEX_DIM_LIMIT) {
            (_, true) => {
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_chunks_embedding_hnsw \
                     ON chunks USING hnsw (embedding vector_cosine_ops) \
                     WITH (m = 16, ef_construction = 64)",
                )
                .execute(&self.pool)
                .await?;
                info!(dimension = self.dimension, "HNSW index ready");
            }
            (VectorIndexMode::Hnsw, false) => {
                // Opt-in only: the half-precision cast loses precision and
                // the operator has accepted that trade.
                sqlx::query(&format!(
                    "CREATE INDEX IF NOT EXISTS idx_chunks_embedding_hnsw \
                     ON chunks USING hnsw ((embedding::halfvec({dim})) halfvec_cosine_ops) \
                     WITH (m = 16, ef_construction = 64)",
                    dim = self.dimension
                ))
                .execute(&self.pool)
                .await?;
                warn!(
                    dimension = self.dimension,
                    "approximate HNSW index over halfvec cast enabled; nearest-neighbor results are no longer exact"
                );
            }
            (VectorIndexMode::Exact, false) => {
                info!(
                    dimension = self.dimension,
                    "dimension exceeds the vector index limit; nearest-neighbor queries run exact scans"
                );
            }
        }

        Ok(())
    }

    /// Assert the persisted chunk shape matches the configured contextual
    /// mode. One wrapper convention holds per deployment; a store written
    /// under the other convention is rejected at startup rather than served
    /// with mixed semantics.
    pub async fn assert_contextual_mode(&self, contextual: bool) -> StoreResult<()> {
        let sample: Option<String> = sqlx::query_scalar("SELECT content FROM chunks LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        if let Some(content) = sample {
            let stored_contextual = crate::chunking::is_contextual(&content);
            if stored_contextual != contextual {
                return Err(StoreError::Integrity(format!(
                    "store holds {} chunks but USE_CONTEXTUAL_CHUNKS={contextual}; \
                     reprocess the corpus before switching modes",
                    if stored_contextual { "contextual" } else { "plain" }
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FrontierStore for PostgresStore {
    async fn insert_url(&self, url: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO pages (url, content, crawl_count) VALUES ($1, '', 0) \
             ON CONFLICT (url) DO NOTHING",
        )
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_urls(&self, urls: &[String]) -> StoreResult<u64> {
        if urls.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "INSERT INTO pages (url, content, crawl_count) \
             SELECT u, '', 0 FROM UNNEST($1::text[]) AS t(u) \
             ON CONFLICT (url) DO NOTHING",
        )
        .bind(urls.to_vec())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn lease_batch(&self, limit: i64) -> StoreResult<Vec<LeasedUrl>> {
        let rows = sqlx::query(
            r#"
            UPDATE pages
            SET crawl_count = crawl_count + 1,
                last_crawled_at = NOW()
            WHERE url IN (
                SELECT url FROM pages
                ORDER BY crawl_count ASC, last_crawled_at ASC NULLS FIRST
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING url, crawl_count
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LeasedUrl {
                url: row.get("url"),
                crawl_count: row.get("crawl_count"),
            })
            .collect())
    }
}

#[async_trait]
impl ChunkStore for PostgresStore {
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

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE page_url = $1")
            .bind(page_url)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks \
                 (page_url, ordinal, content, break_type, char_start, char_end, embedding) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(page_url)
            .bind(chunk.ordinal)
            .bind(&chunk.content)
            .bind(chunk.break_type.as_str())
            .bind(chunk.char_start)
            .bind(chunk.char_end)
            .bind(Vector::from(chunk.embedding.clone()))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE pages SET content = $2, processed_at = NOW(), updated_at = NOW() \
             WHERE url = $1",
        )
        .bind(page_url)
        .bind(content)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SearchStore for PostgresStore {
    async fn nearest(&self, query_vec: &[f32], k: usize) -> StoreResult<Vec<SearchHit>> {
        let approximate =
            self.index_mode == VectorIndexMode::Hnsw && self.dimension > VECTOR_INDEX_DIM_LIMIT;

        // The halfvec cast must match the opt-in index expression exactly,
        // otherwise the planner falls back to a sequential scan.
        let sql = if approximate {
            format!(
                "SELECT id, page_url, content, \
                        1 - (embedding::halfvec({dim}) <=> $1::halfvec({dim})) AS similarity \
                 FROM chunks \
                 ORDER BY embedding::halfvec({dim}) <=> $1::halfvec({dim}), id ASC \
                 LIMIT $2",
                dim = self.dimension
            )
        } else {
            "SELECT id, page_url, content, 1 - (embedding <=> $1) AS similarity \
             FROM chunks \
             ORDER BY embedding <=> $1, id ASC \
             LIMIT $2"
                .to_string()
        };

        let rows = sqlx::query(&sql)
            .bind(Vector::from(query_vec.to_vec()))
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| SearchHit {
                chunk_id: row.get("id"),
                url: row.get("page_url"),
                content: row.get("content"),
                similarity: row.get::<f64, _>("similarity") as f32,
            })
            .collect())
    }

    async fn keyword(&self, query: &str, k: usize) -> StoreResult<Vec<SearchHit>> {
        let rows = sqlx::query(
            "SELECT id, page_url, content, \
                    ts_rank(to_tsvector('english', content), plainto_tsquery('english', $1)) AS score \
             FROM chunks \
             WHERE to_tsvector('english', content) @@ plainto_tsquery('english', $1) \
             ORDER BY score DESC, id ASC \
             LIMIT $2",
        )
        .bind(query)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .map(|row| SearchHit {
                chunk_id: row.get("id"),
                url: row.get("page_url"),
                content: row.get("content"),
                similarity: row.get::<f32, _>("score"),
            })
            .collect();
        normalize_scores(&mut hits);
        Ok(hits)
    }
}

#[async_trait]
impl DashboardStore for PostgresStore {
    async fn list_pages(&self, query: &PageListQuery) -> StoreResult<Vec<PageSummary>> {
        let sort = query
            .sort
            .as_deref()
            .filter(|s| PAGE_SORT_COLUMNS.contains(s))
            .unwrap_or("last_crawled_at");
        let order = if query.descending { "DESC" } else { "ASC" };

        let sql = format!(
            "SELECT id, url, content, crawl_count, last_crawled_at, processed_at, \
                    created_at, updated_at \
             FROM pages \
             WHERE ($1::text IS NULL OR url ILIKE $1 OR content ILIKE $1) \
             ORDER BY {sort} {order} NULLS LAST \
             LIMIT 100"
        );

        let pattern = query.search.as_ref().map(|s| format!("%{s}%"));
        let rows = sqlx::query(&sql).bind(pattern).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| PageSummary {
                id: row.get("id"),
                url: row.get("url"),
                content: row.get("content"),
                crawl_count: row.get("crawl_count"),
                last_crawled_at: row.get("last_crawled_at"),
                processed_at: row.get("processed_at"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    async fn list_chunks(&self, query: &ChunkListQuery) -> StoreResult<ChunkListing> {
        let pattern = query.search.as_ref().map(|s| format!("%{s}%"));
        let size = query.size.clamp(1, 500) as i64;
        let offset = (query.page.max(1) - 1) as i64 * size;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks \
             WHERE ($1::text IS NULL OR page_url ILIKE $1 OR content ILIKE $1)",
        )
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            "SELECT id, page_url, ordinal, content, break_type, created_at \
             FROM chunks \
             WHERE ($1::text IS NULL OR page_url ILIKE $1 OR content ILIKE $1) \
             ORDER BY created_at DESC, id ASC \
             LIMIT $2 OFFSET $3",
        )
        .bind(&pattern)
        .bind(size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(ChunkListing {
            rows: rows
                .into_iter()
                .map(|row| ChunkSummary {
                    id: row.get("id"),
                    page_url: row.get("page_url"),
                    ordinal: row.get("ordinal"),
                    content: row.get("content"),
                    break_type: row.get("break_type"),
                    created_at: row.get("created_at"),
                })
                .collect(),
            total: total as u64,
        })
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let row = sqlx::query(
            "SELECT \
                (SELECT COUNT(*) FROM pages) AS pages_count, \
                (SELECT COUNT(*) FROM chunks) AS chunks_count, \
                (SELECT COUNT(*) FROM pages WHERE content <> '') AS pages_with_content, \
                (SELECT COUNT(*) FROM pages WHERE processed_at IS NOT NULL) AS pages_processed",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            pages_count: row.get::<i64, _>("pages_count") as u64,
            chunks_count: row.get::<i64, _>("chunks_count") as u64,
            pages_with_content: row.get::<i64, _>("pages_with_content") as u64,
            pages_processed: row.get::<i64, _>("pages_processed") as u64,
        })
    }
}
