//! Query-side retrieval engine.
//!
//! Resolves a natural-language question into a ranked chunk list: embed the
//! query, compose candidates (vector-only or hybrid), optionally rerank
//! with the cross-encoder, take the top k. For a fixed store state the same
//! query always returns the same ordering; ties break by chunk id.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::chunking::embedding_input;
use crate::config::SearchConfig;
use crate::embedding::Embedder;
use crate::error::{EngineError, Result};
use crate::rerank::Reranker;
use crate::store::SearchStore;
use crate::types::{SearchHit, SearchMode};

/// One result row of the query response.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub url: String,
    pub content: String,
    pub similarity: f32,
}

/// The ranked answer to one query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub search_mode: SearchMode,
    pub reranking_applied: bool,
    pub results: Vec<RetrievedChunk>,
}

/// Retrieval engine over a search store, the shared embedder and an
/// optional reranker.
pub struct RetrievalEngine<S> {
    store: Arc<S>,
    embedder: Arc<Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    config: SearchConfig,
}

impl<S: SearchStore> RetrievalEngine<S> {
    pub fn new(
        store: Arc<S>,
        embedder: Arc<Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker,
            config,
        }
    }

    /// Answer `text` with the `k` most relevant chunks.
    pub async fn query(&self, text: &str, k: usize) -> Result<QueryOutcome> {
        let query = text.trim();
        if query.is_empty() {
            return Err(EngineError::InvalidQuery {
                reason: "query cannot be empty".to_string(),
            });
        }
        let k = k.max(1);

        let query_vec = self.embedder.embed_query(query).await?;

        let pool_size = k * self.config.oversample.max(1);
        let mut hits = if self.config.use_hybrid {
            self.store.hybrid(&query_vec, query, pool_size).await?
        } else {
            self.store.nearest(&query_vec, pool_size).await?
        };
        sort_hits(&mut hits);

        let search_mode = if self.config.use_hybrid {
            SearchMode::Hybrid
        } else {
            SearchMode::Vector
        };
        debug!(
            query = %query,
            mode = search_mode.as_str(),
            candidates = hits.len(),
            "candidates composed"
        );

        let mut reranking_applied = false;
        if let Some(reranker) = &self.reranker {
            let candidates: Vec<String> =
                hits.iter().map(|hit| embedding_input(&hit.content)).collect();
            match reranker.rerank(query, &candidates).await {
                Ok(scored) => {
                    for (idx, score) in scored {
                        if let Some(hit) = hits.get_mut(idx) {
                            hit.similarity = score;
                        }
                    }
                    sort_hits(&mut hits);
                    reranking_applied = reranker.model_backed();
                }
                Err(failure) => {
                    // Keep the pre-rerank ordering rather than failing the
                    // whole query.
                    warn!(error = %failure, "reranking failed, returning fused order");
                }
            }
        }

        hits.truncate(k);

        Ok(QueryOutcome {
            search_mode,
            reranking_applied,
            results: hits
                .into_iter()
                .map(|hit| RetrievedChunk {
                    url: hit.url,
                    content: hit.content,
                    similarity: hit.similarity,
                })
                .collect(),
        })
    }
}

/// Descending similarity; ties by chunk id ascending for determinism.
fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{MockEmbedder, MockReranker};
    use uuid::Uuid;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    fn engine(
        store: Arc<MemoryStore>,
        embedder: MockEmbedder,
        reranker: Option<Arc<dyn Reranker>>,
        use_hybrid: bool,
    ) -> RetrievalEngine<MemoryStore> {
        let oversample = if reranker.is_some() { 3 } else { 1 };
        RetrievalEngine::new(
            store,
            Arc::new(Embedder::new(Arc::new(embedder))),
            reranker,
            SearchConfig {
                use_hybrid,
                use_reranking: false,
                oversample,
            },
        )
    }

    #[tokio::test]
    async fn test_vector_only_query_ranks_by_distance() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            store.seed_chunk(
                Uuid::from_u128(i as u128 + 1),
                &format!("https://d/{i}"),
                &format!("chunk {i}"),
                unit(5, i),
            );
        }

        let embedder = MockEmbedder::new(5).with_override("pinpoint", unit(5, 2));
        let engine = engine(store, embedder, None, false);

        let outcome = engine.query("pinpoint", 3).await.unwrap();

        assert_eq!(outcome.search_mode, SearchMode::Vector);
        assert!(!outcome.reranking_applied);
        assert_eq!(outcome.results.len(), 3);
        // The exact-match chunk comes first at similarity 1.0.
        assert_eq!(outcome.results[0].url, "https://d/2");
        assert!((outcome.results[0].similarity - 1.0).abs() < 1e-6);
        // Orthogonal ties resolve by chunk id.
        assert_eq!(outcome.results[1].url, "https://d/0");
        assert_eq!(outcome.results[2].url, "https://d/1");
    }

    #[tokio::test]
    async fn test_hybrid_with_rerank_prefers_keyword_bearing_candidate() {
        let store = Arc::new(MemoryStore::new());
        // Two candidates with identical vector similarity to the query;
        // only one carries the literal query tokens.
        store.seed_chunk(
            Uuid::from_u128(1),
            "https://d/plain",
            "a view hierarchy discussion without the magic words",
            vec![0.9950372, 0.0995037],
        );
        store.seed_chunk(
            Uuid::from_u128(2),
            "https://d/keyword",
            "swiftui navigation stack guide",
            vec![0.9950372, -0.0995037],
        );

        let embedder = MockEmbedder::new(2).with_override("swiftui navigation", vec![1.0, 0.0]);
        let engine = engine(store, embedder, Some(Arc::new(MockReranker)), true);

        let outcome = engine.query("swiftui navigation", 2).await.unwrap();

        assert_eq!(outcome.search_mode, SearchMode::Hybrid);
        assert!(outcome.reranking_applied);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].url, "https://d/keyword");
        assert!(outcome.results[0].similarity > outcome.results[1].similarity);
    }

    #[tokio::test]
    async fn test_query_is_deterministic() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..8 {
            store.seed_chunk(
                Uuid::from_u128(i as u128 + 1),
                &format!("https://d/{i}"),
                &format!("content body {i}"),
                unit(8, i),
            );
        }
        let engine = engine(store, MockEmbedder::new(8), None, false);

        let first = engine.query("stable ordering probe", 5).await.unwrap();
        let second = engine.query("stable ordering probe", 5).await.unwrap();

        let urls: Vec<_> = first.results.iter().map(|r| &r.url).collect();
        let urls_again: Vec<_> = second.results.iter().map(|r| &r.url).collect();
        assert_eq!(urls, urls_again);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, MockEmbedder::new(4), None, false);
        let result = engine.query("   ", 5).await;
        assert!(matches!(result, Err(EngineError::InvalidQuery { .. })));
    }

    #[tokio::test]
    async fn test_result_count_capped_at_k() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..10 {
            store.seed_chunk(
                Uuid::from_u128(i as u128 + 1),
                &format!("https://d/{i}"),
                "text",
                unit(4, i % 4),
            );
        }
        let engine = engine(store, MockEmbedder::new(4), Some(Arc::new(MockReranker)), false);
        let outcome = engine.query("anything at all", 3).await.unwrap();
        assert_eq!(outcome.results.len(), 3);
    }
}
