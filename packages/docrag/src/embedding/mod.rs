//! Embedding service abstraction.
//!
//! One contract over two interchangeable providers: a remote embeddings API
//! and a locally hosted ONNX model. The [`Embedder`] front-end owns the
//! behavior both providers must share (dimension enforcement, L2
//! normalization, query-instruction formatting, retries), so
//! switching providers cannot change ranking outcomes.

pub(crate) mod local;
mod remote;

pub use local::LocalProvider;
pub use remote::ApiProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::{EmbeddingConfig, EmbeddingMode};
use crate::error::{EmbeddingError, EmbeddingResult};

/// Task instruction prepended to query-side embeddings. Document-side texts
/// embed raw.
pub const QUERY_INSTRUCTION: &str =
    "Given a web search query, retrieve relevant passages that answer the query";

const MAX_ATTEMPTS: u32 = 3;

/// A backend that maps batches of text to fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Output dimensionality.
    fn dimension(&self) -> usize;
}

/// Construct the provider selected by configuration.
pub fn build_provider(config: &EmbeddingConfig) -> EmbeddingResult<Arc<dyn EmbeddingProvider>> {
    match config.mode {
        EmbeddingMode::Api => Ok(Arc::new(ApiProvider::new(config))),
        EmbeddingMode::Local => Ok(Arc::new(LocalProvider::load(config)?)),
    }
}

/// Provider-independent embedding front-end.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed document-side texts in one batch.
    pub async fn embed_documents(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = self.embed_with_retry(texts).await?;
        for vector in &mut vectors {
            self.check_dimension(vector)?;
            normalize_l2(vector);
        }
        Ok(vectors)
    }

    /// Embed a single document-side text.
    pub async fn embed_document(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let vectors = self.embed_documents(&[text.to_string()]).await?;
        Ok(vectors.into_iter().next().unwrap_or_default())
    }

    /// Embed a query with the retrieval instruction applied.
    pub async fn embed_query(&self, query: &str) -> EmbeddingResult<Vec<f32>> {
        let formatted = format!("Instruct: {QUERY_INSTRUCTION}\nQuery: {query}");
        let vectors = self.embed_documents(&[formatted]).await?;
        Ok(vectors.into_iter().next().unwrap_or_default())
    }

    async fn embed_with_retry(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut backoff = Duration::from_secs(1);
        let mut attempt = 1;
        loop {
            match self.provider.embed_batch(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(failure) if failure_is_retryable(&failure) && attempt < MAX_ATTEMPTS => {
                    warn!(attempt, error = %failure, "embedding attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> EmbeddingResult<()> {
        let expected = self.provider.dimension();
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn failure_is_retryable(failure: &EmbeddingError) -> bool {
    match failure {
        EmbeddingError::Transport(_) => true,
        EmbeddingError::Api { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

/// Normalize a vector to unit length in place. Zero vectors stay zero.
pub fn normalize_l2(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEmbedder;

    #[test]
    fn test_normalize_l2() {
        let mut v = vec![3.0, 4.0];
        normalize_l2(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize_l2(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_embedder_output_is_unit_length() {
        let embedder = Embedder::new(Arc::new(MockEmbedder::new(8)));
        let vectors = embedder
            .embed_documents(&["alpha".into(), "beta".into()])
            .await
            .unwrap();
        for vector in &vectors {
            let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_embedder_is_deterministic() {
        let embedder = Embedder::new(Arc::new(MockEmbedder::new(16)));
        let first = embedder.embed_document("the same text").await.unwrap();
        let second = embedder.embed_document("the same text").await.unwrap();
        let distance = 1.0 - cosine_similarity(&first, &second);
        assert!(distance < 1e-6);
    }

    #[tokio::test]
    async fn test_provider_scaling_cannot_change_rankings() {
        // Two providers returning the same direction at different norms
        // must produce identical vectors after the front-end normalizes.
        let a = Embedder::new(Arc::new(
            MockEmbedder::new(2).with_override("probe", vec![3.0, 4.0]),
        ));
        let b = Embedder::new(Arc::new(
            MockEmbedder::new(2).with_override("probe", vec![6.0, 8.0]),
        ));
        let va = a.embed_document("probe").await.unwrap();
        let vb = b.embed_document("probe").await.unwrap();
        let distance = 1.0 - cosine_similarity(&va, &vb);
        assert!(distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_query_instruction_changes_vector() {
        let embedder = Embedder::new(Arc::new(MockEmbedder::new(16)));
        let as_query = embedder.embed_query("swiftui layout").await.unwrap();
        let as_document = embedder.embed_document("swiftui layout").await.unwrap();
        assert_ne!(as_query, as_document);
    }

    #[tokio::test]
    async fn test_empty_batch_short_circuits() {
        let embedder = Embedder::new(Arc::new(MockEmbedder::new(4)));
        assert!(embedder.embed_documents(&[]).await.unwrap().is_empty());
    }
}
