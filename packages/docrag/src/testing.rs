//! Mock implementations for testing.
//!
//! Deterministic stand-ins for the network- and model-backed components so
//! pipeline and retrieval behavior can be tested hermetically.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::{normalize_l2, EmbeddingProvider};
use crate::error::{EmbeddingResult, FetchError, FetchResult, RerankResult};
use crate::fetch::{FetchedPage, Fetcher};
use crate::rerank::Reranker;

/// Deterministic embedding provider: every text maps to a unit vector
/// derived from a hash of its bytes, so equal texts always embed
/// identically and distinct texts differ.
pub struct MockEmbedder {
    dimension: usize,
    /// Exact vectors returned for inputs containing the key. Lets tests pin
    /// query embeddings to known chunk vectors.
    overrides: Vec<(String, Vec<f32>)>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            overrides: Vec::new(),
        }
    }

    /// Return `vector` for any input containing `key`.
    pub fn with_override(mut self, key: impl Into<String>, vector: Vec<f32>) -> Self {
        self.overrides.push((key.into(), vector));
        self
    }

    fn derive(&self, text: &str) -> Vec<f32> {
        for (key, vector) in &self.overrides {
            if text.contains(key.as_str()) {
                return vector.clone();
            }
        }

        // FNV-style seed, then a splitmix-style sequence per component.
        let mut seed: u64 = 0xcbf29ce484222325;
        for byte in text.bytes() {
            seed ^= byte as u64;
            seed = seed.wrapping_mul(0x100000001b3);
        }
        let mut vector = Vec::with_capacity(self.dimension);
        let mut state = seed;
        for _ in 0..self.dimension {
            state = state.wrapping_add(0x9e3779b97f4a7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
            z ^= z >> 31;
            // Map to [-1, 1).
            vector.push((z as f32 / u64::MAX as f32) * 2.0 - 1.0);
        }
        normalize_l2(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.derive(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Canned fetcher: serves configured pages, records every call.
#[derive(Default)]
pub struct MockFetcher {
    pages: HashMap<String, (String, Vec<String>)>,
    transient: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` for `url` with no outbound links.
    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), (html.into(), Vec::new()));
        self
    }

    /// Serve `html` for `url`, discovering `links`.
    pub fn with_page_and_links(
        mut self,
        url: impl Into<String>,
        html: impl Into<String>,
        links: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.pages.insert(
            url.into(),
            (html.into(), links.into_iter().map(|l| l.into()).collect()),
        );
        self
    }

    /// Fail `url` with a transient error.
    pub fn with_transient_failure(mut self, url: impl Into<String>) -> Self {
        self.transient.push(url.into());
        self
    }

    /// URLs fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedPage> {
        self.calls.lock().unwrap().push(url.to_string());

        if self.transient.iter().any(|u| u == url) {
            return Err(FetchError::Transient {
                url: url.to_string(),
                reason: "mock transient failure".to_string(),
            });
        }

        match self.pages.get(url) {
            Some((html, links)) => Ok(FetchedPage {
                status: 200,
                html: html.clone(),
                discovered_urls: links.clone(),
                fetch_duration: Duration::from_millis(1),
            }),
            None => Err(FetchError::Permanent {
                url: url.to_string(),
                reason: "mock: no such page".to_string(),
            }),
        }
    }
}

/// Term-overlap reranker: score is the fraction of query terms present in
/// the candidate. Good enough to verify that keyword-bearing candidates
/// rise when reranking is on.
pub struct MockReranker;

#[async_trait]
impl Reranker for MockReranker {
    async fn rerank(&self, query: &str, candidates: &[String]) -> RerankResult<Vec<(usize, f32)>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        Ok(candidates
            .iter()
            .enumerate()
            .map(|(idx, candidate)| {
                let lower = candidate.to_lowercase();
                let matched = terms.iter().filter(|t| lower.contains(**t)).count();
                let score = if terms.is_empty() {
                    0.0
                } else {
                    matched as f32 / terms.len() as f32
                };
                (idx, score)
            })
            .collect())
    }

    fn model_backed(&self) -> bool {
        true
    }
}
