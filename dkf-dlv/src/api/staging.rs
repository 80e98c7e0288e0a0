//! Staging set API handlers
//!
//! GET/POST/DELETE /staging, DELETE /staging/{entry_id}

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::StagedEntry,
    AppState,
};

/// POST /staging request
#[derive(Debug, Deserialize)]
pub struct StagePathsRequest {
    pub paths: Vec<PathBuf>,
}

/// Staging set listing
#[derive(Debug, Serialize)]
pub struct StagingResponse {
    pub entries: Vec<StagedEntry>,
    pub total_files: usize,
}

async fn snapshot(state: &AppState) -> StagingResponse {
    let staging = state.staging.read().await;
    StagingResponse {
        entries: staging.entries().to_vec(),
        total_files: staging.total_files(),
    }
}

/// GET /staging
pub async fn list_staging(State(state): State<AppState>) -> Json<StagingResponse> {
    Json(snapshot(&state).await)
}

/// POST /staging
///
/// Stages every path or none: a missing path rejects the whole request.
pub async fn stage_paths(
    State(state): State<AppState>,
    Json(request): Json<StagePathsRequest>,
) -> ApiResult<Json<StagingResponse>> {
    if request.paths.is_empty() {
        return Err(ApiError::BadRequest("No paths given".to_string()));
    }

    // Recursive file counts walk the tree; keep that off the runtime
    let paths = request.paths.clone();
    let built = tokio::task::spawn_blocking(move || {
        paths
            .iter()
            .map(|p| StagedEntry::from_path(p).map_err(|e| (p.clone(), e)))
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Staging task failed: {}", e)))?;

    let entries = built.map_err(|(path, e)| {
        ApiError::BadRequest(format!("Cannot stage {}: {}", path.display(), e))
    })?;

    {
        let mut staging = state.staging.write().await;
        for entry in entries {
            let staged = staging.insert(entry);
            tracing::debug!(entry_id = %staged.id, path = %staged.path.display(), "Staged");
        }
    }

    Ok(Json(snapshot(&state).await))
}

/// DELETE /staging
pub async fn clear_staging(State(state): State<AppState>) -> Json<StagingResponse> {
    state.staging.write().await.clear();
    tracing::info!("Staging cleared");
    Json(snapshot(&state).await)
}

/// DELETE /staging/{entry_id}
pub async fn remove_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> ApiResult<Json<StagedEntry>> {
    state
        .staging
        .write()
        .await
        .remove(entry_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Staged entry not found: {}", entry_id)))
}

/// Build staging routes
pub fn staging_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/staging",
            get(list_staging).post(stage_paths).delete(clear_staging),
        )
        .route("/staging/:entry_id", delete(remove_entry))
}
