//! Settings API handlers
//!
//! GET /settings, POST /settings/reload

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use dkf_common::Settings;
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    AppState,
};

/// GET /settings
pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.snapshot().as_ref().clone())
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub path: String,
    /// Whether cached search indexes were dropped
    pub indexes_invalidated: bool,
}

/// POST /settings/reload
///
/// Re-reads the settings file. Runs already in flight keep their snapshot.
pub async fn reload_settings(State(state): State<AppState>) -> ApiResult<Json<ReloadResponse>> {
    let path = state
        .config_path
        .clone()
        .ok_or_else(|| ApiError::BadRequest("No settings file configured".to_string()))?;

    let load_path = path.clone();
    let settings = tokio::task::spawn_blocking(move || Settings::load(&load_path))
        .await
        .map_err(|e| ApiError::Internal(format!("Settings load task failed: {}", e)))??;
    settings.validate()?;

    let indexes_invalidated = state.settings.replace(settings);
    if indexes_invalidated {
        state.indexer.invalidate_all();
    }
    tracing::info!(
        path = %path.display(),
        indexes_invalidated,
        "Settings reloaded"
    );

    Ok(Json(ReloadResponse {
        path: path.to_string_lossy().to_string(),
        indexes_invalidated,
    }))
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/settings", get(get_settings))
        .route("/settings/reload", post(reload_settings))
}
