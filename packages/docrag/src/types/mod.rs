//! Core data types for pages, chunks and search results.

pub mod chunk;
pub mod page;
pub mod search;

pub use chunk::{BreakType, ChunkRecord, NewChunk};
pub use page::{LeasedUrl, PageRecord};
pub use search::{SearchHit, SearchMode};
