//! Music demo folders
//!
//! POST /demos

use axum::{extract::State, routing::post, Json, Router};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{
    error::{ApiError, ApiResult},
    services::{
        path_config::find_docket_folder,
        sequence_allocator::{next_sequence, resolve_demo_folder},
        PathConfig,
    },
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct DemoFolderRequest {
    pub docket: String,
    /// Today when absent
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct DemoFolderResponse {
    pub docket: String,
    pub folder: PathBuf,
    /// Whether an existing date folder was picked instead of a new one
    pub reused: bool,
}

/// POST /demos
///
/// Resolves `<year>_MUSIC DEMOS/<docket>/NN_<date>/`, reusing the docket's
/// most recent date folder when there is one.
pub async fn demo_folder(
    State(state): State<AppState>,
    Json(request): Json<DemoFolderRequest>,
) -> ApiResult<Json<DemoFolderResponse>> {
    let docket = request.docket.trim().to_string();
    if docket.is_empty() {
        return Err(ApiError::BadRequest("Docket must not be empty".to_string()));
    }
    let date = request.date.unwrap_or_else(|| Local::now().date_naive());
    let paths = PathConfig::new(state.settings.snapshot());

    let lookup = docket.clone();
    let (folder, reused) = tokio::task::spawn_blocking(move || {
        let demos = paths.demos_folder(date.year());
        let docket_dir =
            find_docket_folder(&demos, &lookup).unwrap_or_else(|| demos.join(&lookup));
        // Any numbered folder means the most recent one is reused
        let reused = next_sequence(&docket_dir) > 1;
        let folder = resolve_demo_folder(&docket_dir, &paths.demo_date_text(date))?;
        Ok::<_, std::io::Error>((folder, reused))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Demo folder task failed: {}", e)))??;

    tracing::info!(docket = %docket, folder = %folder.display(), reused, "Demo folder resolved");
    Ok(Json(DemoFolderResponse {
        docket,
        folder,
        reused,
    }))
}

/// Build demo routes
pub fn demo_routes() -> Router<AppState> {
    Router::new().route("/demos", post(demo_folder))
}
