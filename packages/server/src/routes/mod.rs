//! HTTP route handlers.

mod dashboard;
mod health;
mod rag;

pub use dashboard::{chunks_handler, pages_handler, stats_handler};
pub use health::health_handler;
pub use rag::rag_query_handler;
