//! Per-URL ingestion pipeline.
//!
//! Drives one leased URL through fetch → extract → chunk → embed →
//! persist, then expands the frontier with the links the fetch discovered.
//! Everything up to persistence runs off the connection pool; only the
//! replace-chunks call holds a transaction.
//!
//! Failure semantics: any step failing leaves the page row untouched
//! beyond the already-durable lease counter. The caller logs the failure
//! and moves on; the counter ordering naturally reintroduces the URL
//! later.

use std::sync::Arc;

use tracing::{debug, info};

use crate::chunking::{chunk_markdown, embedding_input, wrap_with_context};
use crate::config::ProcessorConfig;
use crate::embedding::Embedder;
use crate::error::{EngineError, Result};
use crate::extract::ContentExtractor;
use crate::fetch::Fetcher;
use crate::store::EngineStore;
use crate::types::NewChunk;

/// What one pipeline run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlReport {
    pub chunks: usize,
    pub discovered: u64,
}

/// The ingestion processor: owns the per-URL pipeline, shares the fetcher,
/// embedder and store with every concurrent wave.
pub struct IngestProcessor<S> {
    fetcher: Arc<dyn Fetcher>,
    extractor: ContentExtractor,
    embedder: Arc<Embedder>,
    store: Arc<S>,
    config: ProcessorConfig,
}

impl<S: EngineStore> IngestProcessor<S> {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        extractor: ContentExtractor,
        embedder: Arc<Embedder>,
        store: Arc<S>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            embedder,
            store,
            config,
        }
    }

    /// Run the full pipeline for one leased URL.
    pub async fn process_url(&self, url: &str) -> Result<UrlReport> {
        let fetched = self.fetcher.fetch(url).await?;
        let markdown = self.extractor.extract(&fetched.html);

        // A near-empty extraction is a challenge page that slipped past the
        // fetcher's heuristic; skip without persisting.
        let extracted_chars = markdown.chars().count();
        if extracted_chars < self.config.min_content_chars {
            return Err(EngineError::ThinContent {
                url: url.to_string(),
                chars: extracted_chars,
            });
        }

        let pieces = chunk_markdown(&markdown, self.config.chunk_size);
        debug!(url = %url, chunks = pieces.len(), chars = extracted_chars, "page chunked");

        let contents: Vec<String> = pieces
            .iter()
            .map(|piece| {
                if self.config.contextual_chunks {
                    wrap_with_context(&markdown, piece)
                } else {
                    piece.content.clone()
                }
            })
            .collect();

        let inputs: Vec<String> = contents.iter().map(|c| embedding_input(c)).collect();
        let embeddings = self.embedder.embed_documents(&inputs).await?;

        let new_chunks: Vec<NewChunk> = pieces
            .iter()
            .zip(contents.into_iter().zip(embeddings))
            .enumerate()
            .map(|(ordinal, (piece, (content, embedding)))| NewChunk {
                ordinal: ordinal as i32,
                content,
                break_type: piece.break_type,
                char_start: piece.start as i32,
                char_end: piece.end as i32,
                embedding,
            })
            .collect();

        self.store
            .replace_chunks(url, &markdown, &new_chunks)
            .await?;

        let discovered = self.store.insert_urls(&fetched.discovered_urls).await?;

        info!(
            url = %url,
            chunks = new_chunks.len(),
            discovered,
            fetch_ms = fetched.fetch_duration.as_millis() as u64,
            "page ingested"
        );

        Ok(UrlReport {
            chunks: new_chunks.len(),
            discovered,
        })
    }
}
