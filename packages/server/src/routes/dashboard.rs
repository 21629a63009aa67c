//! Read-only observation endpoints over pages and chunks.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use docrag::store::{ChunkListQuery, ChunkSummary, DashboardStore, PageListQuery, PageSummary};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct PagesParams {
    pub sort: Option<String>,
    pub order: Option<String>,
    pub search: Option<String>,
}

#[derive(Serialize)]
pub struct PagesResponse {
    pub success: bool,
    pub data: Vec<PageSummary>,
    pub count: usize,
}

/// `GET /api/pages?sort=<col>&order=<asc|desc>&search=<q>`
pub async fn pages_handler(
    State(state): State<AppState>,
    Query(params): Query<PagesParams>,
) -> Result<Json<PagesResponse>, (StatusCode, Json<serde_json::Value>)> {
    let query = PageListQuery {
        sort: params.sort,
        descending: !matches!(params.order.as_deref(), Some("asc")),
        search: params.search.filter(|s| !s.is_empty()),
    };

    match state.store.list_pages(&query).await {
        Ok(data) => Ok(Json(PagesResponse {
            success: true,
            count: data.len(),
            data,
        })),
        Err(failure) => {
            error!(error = %failure, "pages listing failed");
            Err(internal_error(&failure))
        }
    }
}

fn default_page() -> u64 {
    1
}

fn default_size() -> u64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct ChunksParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_size")]
    pub size: u64,
    pub search: Option<String>,
}

#[derive(Serialize)]
pub struct Pagination {
    pub page: u64,
    pub size: u64,
    pub total: u64,
    pub pages: u64,
}

#[derive(Serialize)]
pub struct ChunksResponse {
    pub success: bool,
    pub data: Vec<ChunkSummary>,
    pub pagination: Pagination,
}

/// `GET /api/chunks?page=<n>&size=<n>&search=<q>`
pub async fn chunks_handler(
    State(state): State<AppState>,
    Query(params): Query<ChunksParams>,
) -> Result<Json<ChunksResponse>, (StatusCode, Json<serde_json::Value>)> {
    let query = ChunkListQuery {
        page: params.page.max(1),
        size: params.size.clamp(1, 500),
        search: params.search.filter(|s| !s.is_empty()),
    };

    match state.store.list_chunks(&query).await {
        Ok(listing) => Ok(Json(ChunksResponse {
            success: true,
            data: listing.rows,
            pagination: Pagination {
                page: query.page,
                size: query.size,
                total: listing.total,
                pages: listing.total.div_ceil(query.size),
            },
        })),
        Err(failure) => {
            error!(error = %failure, "chunks listing failed");
            Err(internal_error(&failure))
        }
    }
}

/// `GET /api/stats`
pub async fn stats_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.store.stats().await {
        Ok(stats) => {
            let content_percentage = percentage(stats.pages_with_content, stats.pages_count);
            let processing_percentage = percentage(stats.pages_processed, stats.pages_count);
            Ok(Json(json!({
                "success": true,
                "data": {
                    "pages_count": stats.pages_count,
                    "chunks_count": stats.chunks_count,
                    "pages_with_content": stats.pages_with_content,
                    "content_percentage": content_percentage,
                    "pages_processed": stats.pages_processed,
                    "processing_percentage": processing_percentage,
                }
            })))
        }
        Err(failure) => {
            error!(error = %failure, "stats query failed");
            Err(internal_error(&failure))
        }
    }
}

/// Two-decimal percentage, `"0.00"` when the denominator is zero.
fn percentage(part: u64, whole: u64) -> String {
    if whole == 0 {
        "0.00".to_string()
    } else {
        format!("{:.2}", part as f64 / whole as f64 * 100.0)
    }
}

fn internal_error(failure: &dyn std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "error": failure.to_string(),
            "data": [],
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_formatting() {
        assert_eq!(percentage(0, 0), "0.00");
        assert_eq!(percentage(1, 3), "33.33");
        assert_eq!(percentage(3, 3), "100.00");
    }
}
