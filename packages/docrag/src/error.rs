//! Typed errors for the knowledge engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Binaries wrap these in
//! `anyhow` at the edge.

use thiserror::Error;

/// Top-level errors for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Fetch operation failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Content extraction produced nothing usable
    #[error("extraction yielded {chars} chars for {url}, below minimum")]
    ThinContent { url: String, chars: usize },

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Reranking failed
    #[error("rerank error: {0}")]
    Rerank(#[from] RerankError),

    /// Storage operation failed
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Invalid query provided
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while fetching a page.
///
/// The three variants map to the scheduler's retry policy: `Transient` and
/// `Blocked` requeue naturally through the crawl counter, `Permanent` does
/// not get an in-fetcher retry.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Timeout, 5xx, 429 or connection-level failure; retryable
    #[error("transient fetch failure for {url}: {reason}")]
    Transient { url: String, reason: String },

    /// 4xx (other than 429), DNS failure, malformed URL; not retried
    #[error("permanent fetch failure for {url}: {reason}")]
    Permanent { url: String, reason: String },

    /// Anti-bot challenge page detected; treated as transient with backoff
    #[error("challenge page detected for {url}")]
    Blocked { url: String },
}

impl FetchError {
    /// Whether the fetcher's own retry budget applies to this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Blocked { .. })
    }
}

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Upstream API rejected or failed the request
    #[error("embedding API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Request/response transport failure
    #[error("embedding transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A single input was too large even after batch splitting
    #[error("input of {chars} chars exceeds provider limits")]
    InputTooLarge { chars: usize },

    /// Provider returned a vector of the wrong dimension
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Local model failed to load or run
    #[error("local model error: {0}")]
    Model(String),

    /// The dedicated inference worker is gone
    #[error("inference worker unavailable")]
    WorkerGone,
}

/// Errors raised by the reranker.
#[derive(Debug, Error)]
pub enum RerankError {
    /// Local model failed to load or run
    #[error("reranker model error: {0}")]
    Model(String),

    /// The dedicated inference worker is gone
    #[error("inference worker unavailable")]
    WorkerGone,

    /// Fallback scoring failed
    #[error("fallback scoring error: {0}")]
    Fallback(#[from] Box<EmbeddingError>),
}

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database-level failure; the enclosing transaction has been rolled back
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted row violated an engine invariant
    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// An environment variable failed to parse
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for embedding operations.
pub type EmbeddingResult<T> = std::result::Result<T, EmbeddingError>;

/// Result type alias for rerank operations.
pub type RerankResult<T> = std::result::Result<T, RerankError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
