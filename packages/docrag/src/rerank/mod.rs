//! Cross-encoder reranking with a cosine-similarity fallback.
//!
//! The primary strategy scores each (query, candidate) pair with a local
//! cross-encoder model. When the model cannot be loaded at startup the
//! engine degrades to cosine similarity between query and candidate
//! embeddings; responses report which strategy produced the ordering.

mod local;

pub use local::LocalReranker;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::config::RerankerConfig;
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{RerankResult, RerankError};

/// Scores candidates against a query; higher is more relevant, in [0, 1].
#[async_trait]
pub trait Reranker: Send + Sync {
    /// One `(index, score)` per candidate, in input order.
    async fn rerank(&self, query: &str, candidates: &[String]) -> RerankResult<Vec<(usize, f32)>>;

    /// True when scores come from the cross-encoder model rather than the
    /// embedding-similarity fallback.
    fn model_backed(&self) -> bool;
}

/// Build the configured reranker, or `None` when reranking is disabled.
///
/// A missing or broken model degrades to the cosine fallback instead of
/// failing startup.
pub fn build_reranker(
    config: &RerankerConfig,
    embedder: Arc<Embedder>,
) -> Option<Arc<dyn Reranker>> {
    if !config.enabled {
        return None;
    }
    match LocalReranker::load(config) {
        Ok(model) => Some(Arc::new(model)),
        Err(failure) => {
            warn!(
                model = %config.model,
                error = %failure,
                "reranker model unavailable, degrading to embedding similarity"
            );
            Some(Arc::new(CosineReranker::new(embedder)))
        }
    }
}

/// Fallback reranker: cosine similarity between query and candidate
/// embeddings, mapped from [-1, 1] into [0, 1].
pub struct CosineReranker {
    embedder: Arc<Embedder>,
}

impl CosineReranker {
    pub fn new(embedder: Arc<Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Reranker for CosineReranker {
    async fn rerank(&self, query: &str, candidates: &[String]) -> RerankResult<Vec<(usize, f32)>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| RerankError::Fallback(Box::new(e)))?;
        let candidate_vecs = self
            .embedder
            .embed_documents(candidates)
            .await
            .map_err(|e| RerankError::Fallback(Box::new(e)))?;

        Ok(candidate_vecs
            .iter()
            .enumerate()
            .map(|(idx, vec)| {
                let score = (cosine_similarity(&query_vec, vec) + 1.0) / 2.0;
                (idx, score.clamp(0.0, 1.0))
            })
            .collect())
    }

    fn model_backed(&self) -> bool {
        false
    }
}

/// Cubic score calibration: `c0 + c1·x + c2·x² + c3·x³`, clipped to [0, 1].
///
/// Off by default: calibration improves score correlation but can reduce
/// ranking agreement on some inputs, so it is an explicit opt-in.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub coefficients: [f64; 4],
}

impl Calibration {
    /// The identity mapping.
    pub fn identity() -> Self {
        Self {
            coefficients: [0.0, 1.0, 0.0, 0.0],
        }
    }

    /// Apply the polynomial and clip to [0, 1].
    pub fn apply(&self, score: f32) -> f32 {
        let x = score as f64;
        let [c0, c1, c2, c3] = self.coefficients;
        let y = c0 + c1 * x + c2 * x * x + c3 * x * x * x;
        y.clamp(0.0, 1.0) as f32
    }

    /// Least-squares cubic fit over observed `(raw, target)` score pairs.
    ///
    /// Returns `None` when the system is degenerate (fewer than four
    /// distinct points).
    pub fn fit(pairs: &[(f32, f32)]) -> Option<Self> {
        if pairs.len() < 4 {
            return None;
        }

        // Normal equations for a degree-3 polynomial: A·c = b with
        // A[i][j] = Σ x^(i+j), b[i] = Σ y·x^i.
        let mut a = [[0.0f64; 4]; 4];
        let mut b = [0.0f64; 4];
        for &(x, y) in pairs {
            let x = x as f64;
            let y = y as f64;
            let mut powers = [1.0f64; 7];
            for k in 1..7 {
                powers[k] = powers[k - 1] * x;
            }
            for i in 0..4 {
                for j in 0..4 {
                    a[i][j] += powers[i + j];
                }
                b[i] += y * powers[i];
            }
        }

        solve_4x4(a, b).map(|coefficients| Self { coefficients })
    }
}

/// Gaussian elimination with partial pivoting.
fn solve_4x4(mut a: [[f64; 4]; 4], mut b: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot = (col..4).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..4 {
            let factor = a[row][col] / a[col][col];
            for k in col..4 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; 4];
    for row in (0..4).rev() {
        let mut sum = b[row];
        for k in row + 1..4 {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}
