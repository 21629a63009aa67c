//! Application setup and router construction.

use std::sync::Arc;

use axum::http::header::CONTENT_TYPE;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use docrag::{PostgresStore, RetrievalEngine};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::routes::{
    chunks_handler, health_handler, pages_handler, rag_query_handler, stats_handler,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub store: Arc<PostgresStore>,
    pub retrieval: Arc<RetrievalEngine<PostgresStore>>,
}

/// Build the Axum application router.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/tools/perform_rag_query", post(rag_query_handler))
        .route("/api/pages", get(pages_handler))
        .route("/api/chunks", get(chunks_handler))
        .route("/api/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
