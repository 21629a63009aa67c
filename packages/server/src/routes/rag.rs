//! The `perform_rag_query` tool endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use docrag::{EngineError, RetrievedChunk, SearchMode};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::app::AppState;

fn default_match_count() -> usize {
    5
}

#[derive(Debug, Deserialize)]
pub struct RagQueryRequest {
    pub query: String,
    #[serde(default = "default_match_count")]
    pub match_count: usize,
}

#[derive(Serialize)]
pub struct RagQueryResponse {
    pub success: bool,
    pub query: String,
    pub search_mode: SearchMode,
    pub reranking_applied: bool,
    pub results: Vec<RetrievedChunk>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct RagQueryError {
    pub success: bool,
    pub query: String,
    pub error: String,
}

/// Perform a retrieval-augmented query over the stored documentation.
pub async fn rag_query_handler(
    State(state): State<AppState>,
    Json(request): Json<RagQueryRequest>,
) -> Result<Json<RagQueryResponse>, (StatusCode, Json<RagQueryError>)> {
    info!(query = %request.query, match_count = request.match_count, "rag query received");

    match state.retrieval.query(&request.query, request.match_count).await {
        Ok(outcome) => {
            info!(
                query = %request.query,
                count = outcome.results.len(),
                reranking_applied = outcome.reranking_applied,
                "rag query completed"
            );
            Ok(Json(RagQueryResponse {
                success: true,
                query: request.query,
                search_mode: outcome.search_mode,
                reranking_applied: outcome.reranking_applied,
                count: outcome.results.len(),
                results: outcome.results,
            }))
        }
        Err(failure) => {
            let status = match &failure {
                EngineError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error!(query = %request.query, error = %failure, "rag query failed");
            Err((
                status,
                Json(RagQueryError {
                    success: false,
                    query: request.query,
                    error: failure.to_string(),
                }),
            ))
        }
    }
}
