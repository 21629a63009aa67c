//! Retrieval-Augmented Documentation Knowledge Engine
//!
//! Continuously crawls a technical documentation tree, distills pages into
//! pollution-free markdown, segments them with structure-aware chunking,
//! embeds the segments into a high-dimensional vector space, persists
//! everything in PostgreSQL + pgvector, and answers natural-language
//! queries with a blend of dense-vector, lexical and cross-encoder-reranked
//! retrieval.
//!
//! # Architecture
//!
//! ```text
//! CrawlScheduler ──► IngestProcessor ──► Fetcher ──► ContentExtractor
//!       ▲                  │                              │
//!       │                  ▼                              ▼
//!   pages table ◄──── replace_chunks ◄── Embedder ◄── chunk_markdown
//!  (the frontier)
//!
//! query ──► RetrievalEngine ──► Embedder + SearchStore (+ Reranker) ──► ranked chunks
//! ```
//!
//! # Modules
//!
//! - [`config`] - Environment-driven configuration
//! - [`types`] - Core data types: pages, chunks, search hits
//! - [`fetch`] - Stealth fetching and link discovery
//! - [`extract`] - CSS-targeted extraction and the pollution filter
//! - [`chunking`] - Greedy structure-aware chunker + contextual wrapper
//! - [`embedding`] - Provider abstraction (remote API / local ONNX model)
//! - [`rerank`] - Cross-encoder reranking with cosine fallback
//! - [`store`] - Frontier, chunk and search persistence (Postgres / memory)
//! - [`scheduler`] - Lease-based continuous crawl loop
//! - [`processor`] - Per-URL ingestion pipeline
//! - [`retrieval`] - Query-side engine
//! - [`testing`] - Deterministic mocks for hermetic tests

pub mod chunking;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod processor;
pub mod rerank;
pub mod retrieval;
pub mod scheduler;
pub mod store;
pub mod testing;
pub mod types;

// Re-export the assembly surface at the crate root.
pub use config::{Config, EmbeddingMode, VectorIndexMode};
pub use embedding::{build_provider, Embedder};
pub use error::{EngineError, Result};
pub use extract::{ContentExtractor, ExtractorConfig};
pub use fetch::{Fetcher, FetcherConfig, StealthFetcher};
pub use processor::IngestProcessor;
pub use rerank::{build_reranker, Reranker};
pub use retrieval::{QueryOutcome, RetrievalEngine, RetrievedChunk};
pub use scheduler::{CrawlScheduler, SchedulerConfig};
pub use store::{
    DashboardStore, EngineStore, MemoryStore, PostgresStore, SearchStore,
};
pub use types::{BreakType, SearchHit, SearchMode};
