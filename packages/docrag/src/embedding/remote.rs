//! Remote embeddings API provider.
//!
//! Speaks the common `{model, input}` embeddings wire shape with a bearer
//! key. Concurrency is bounded by a FIFO semaphore; oversized batches are
//! halved recursively when the server answers 413, down to a single input.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, EmbeddingResult};

/// Guard against pathological recursion while halving.
const MAX_SPLIT_DEPTH: u32 = 10;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Bearer-authenticated client for a remote embeddings endpoint.
pub struct ApiProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    permits: Arc<Semaphore>,
}

impl ApiProvider {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.api_timeout)
            .build()
            .expect("Failed to create HTTP client");

        info!(
            model = %config.model,
            endpoint = %config.api_url,
            max_concurrent = config.max_concurrent_requests,
            "embedding API provider initialized"
        );

        Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            permits: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
        }
    }

    async fn request_once(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EmbeddingError::WorkerGone)?;

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.data.len()
                ),
            });
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    /// Embed a batch, halving it whenever the server rejects the payload
    /// size.
    fn request_adaptive<'a>(
        &'a self,
        texts: &'a [String],
        depth: u32,
    ) -> BoxFuture<'a, EmbeddingResult<Vec<Vec<f32>>>> {
        async move {
            match self.request_once(texts).await {
                Ok(vectors) => Ok(vectors),
                Err(EmbeddingError::Api { status: 413, .. }) if depth < MAX_SPLIT_DEPTH => {
                    if texts.len() == 1 {
                        return Err(EmbeddingError::InputTooLarge {
                            chars: texts[0].chars().count(),
                        });
                    }
                    let mid = texts.len() / 2;
                    debug!(
                        batch = texts.len(),
                        left = mid,
                        right = texts.len() - mid,
                        "payload too large, splitting batch"
                    );
                    let mut left = self.request_adaptive(&texts[..mid], depth + 1).await?;
                    let right = self.request_adaptive(&texts[mid..], depth + 1).await?;
                    left.extend(right);
                    Ok(left)
                }
                Err(failure) => Err(failure),
            }
        }
        .boxed()
    }
}

#[async_trait]
impl EmbeddingProvider for ApiProvider {
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_adaptive(texts, 0).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
