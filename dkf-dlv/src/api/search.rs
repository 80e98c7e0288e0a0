//! Docket search and index maintenance
//!
//! GET /search, POST /index/invalidate, POST /scaffolding/{year}

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use dkf_common::events::SearchDomain;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{
    error::{ApiError, ApiResult},
    services::{PathConfig, SearchResults},
    AppState,
};

fn default_domain() -> SearchDomain {
    SearchDomain::WorkPicture
}

/// GET /search query string
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_domain")]
    pub domain: SearchDomain,
}

/// GET /search response
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub domain: SearchDomain,
    #[serde(flatten)]
    pub results: SearchResults,
}

/// GET /search?q=...&domain=...
///
/// The domain index is built on first use and cached until invalidated.
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResponse>> {
    let text = query.q.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("Query must not be empty".to_string()));
    }
    let results = state.search.search(text, query.domain).await;
    tracing::debug!(
        query = text,
        domain = %query.domain,
        exact = results.exact.len(),
        fuzzy = results.fuzzy.len(),
        "Search"
    );
    Ok(Json(SearchResponse {
        query: text.to_string(),
        domain: query.domain,
        results,
    }))
}

/// POST /index/invalidate request
#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    /// All domains when absent
    #[serde(default)]
    pub domain: Option<SearchDomain>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub invalidated: Vec<SearchDomain>,
}

/// POST /index/invalidate
pub async fn invalidate_index(
    State(state): State<AppState>,
    request: Option<Json<InvalidateRequest>>,
) -> Json<InvalidateResponse> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let invalidated = match request.domain {
        Some(domain) => {
            state.indexer.invalidate(domain);
            vec![domain]
        }
        None => {
            state.indexer.invalidate_all();
            SearchDomain::ALL.to_vec()
        }
    };
    Json(InvalidateResponse { invalidated })
}

#[derive(Debug, Serialize)]
pub struct ScaffoldingResponse {
    pub year: i32,
    /// Folders that did not exist before
    pub created: Vec<PathBuf>,
}

/// POST /scaffolding/{year}
///
/// Creates the year folder tree, then drops every cached index.
pub async fn create_scaffolding(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> ApiResult<Json<ScaffoldingResponse>> {
    if !(1900..=9999).contains(&year) {
        return Err(ApiError::BadRequest(format!("Invalid year: {}", year)));
    }
    let paths = PathConfig::new(state.settings.snapshot());
    let created = tokio::task::spawn_blocking(move || paths.ensure_year_scaffolding(year))
        .await
        .map_err(|e| ApiError::Internal(format!("Scaffolding task failed: {}", e)))??;

    state.indexer.invalidate_all();
    Ok(Json(ScaffoldingResponse { year, created }))
}

/// Build search routes
pub fn search_routes() -> Router<AppState> {
    Router::new()
        .route("/search", get(search))
        .route("/index/invalidate", post(invalidate_index))
        .route("/scaffolding/:year", post(create_scaffolding))
}
