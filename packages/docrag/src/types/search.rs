//! Search result types shared by the store and the retrieval engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which candidate-composition strategy answered a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Hybrid => "hybrid",
        }
    }
}

/// One retrieved chunk with the score that ordered it.
///
/// `similarity` carries whatever score the producing operation ranks by:
/// cosine similarity for nearest-neighbor search, a normalized lexical score
/// for keyword search, the weighted fusion score for hybrid search, and the
/// reranker score after reranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub url: String,
    pub content: String,
    pub similarity: f32,
}

impl SearchHit {
    pub fn new(chunk_id: Uuid, url: impl Into<String>, content: impl Into<String>, similarity: f32) -> Self {
        Self {
            chunk_id,
            url: url.into(),
            content: content.into(),
            similarity,
        }
    }
}
