//! Delivery job API handlers
//!
//! POST /jobs, GET /jobs, GET /jobs/{job_id}, POST /jobs/{job_id}/cancel,
//! POST /jobs/{job_id}/transcode

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Local, NaiveDate, Utc};
use dkf_common::events::JobMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{JobOutcome, JobRequest, JobRunState, JobStatus, PrepChecklistSession, TranscodeDecision},
    services::Preflight,
    AppState, JobHandle,
};

/// Finished jobs stay listed this long
const FINISHED_JOB_RETENTION_MINUTES: i64 = 60;

fn finished_job_retention() -> chrono::Duration {
    chrono::Duration::minutes(FINISHED_JOB_RETENTION_MINUTES)
}

/// POST /jobs request
#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    pub mode: JobMode,
    pub docket: String,
    /// Work Picture date; today when absent
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// Prep date; the Work Picture date when absent
    #[serde(default)]
    pub prep_date: Option<NaiveDate>,
    /// Subset of staged entries; everything staged when absent
    #[serde(default)]
    pub entry_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub checklist: Option<PrepChecklistSession>,
    /// Fill an earlier delivery folder instead of allocating a new one
    #[serde(default)]
    pub resume_folder: Option<PathBuf>,
}

/// POST /jobs response
#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub job_id: Uuid,
    pub started: bool,
    /// Present when the job finished without starting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
}

/// GET /jobs/{job_id} response
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub docket: String,
    pub mode: JobMode,
    pub started_at: DateTime<Utc>,
    pub state: JobRunState,
    pub awaiting_transcode_decision: bool,
    pub outcome: Option<JobOutcome>,
}

async fn status_of(state: &AppState, job_id: Uuid, handle: &JobHandle) -> JobStatusResponse {
    let run_state = handle.state.borrow().clone();
    let outcome = handle.outcome.read().await.clone();
    JobStatusResponse {
        job_id,
        docket: handle.docket.clone(),
        mode: handle.mode,
        started_at: handle.started_at,
        state: run_state,
        awaiting_transcode_decision: state.transcode.is_waiting(job_id),
        outcome,
    }
}

async fn find_job(state: &AppState, job_id: Uuid) -> ApiResult<JobHandle> {
    state
        .jobs
        .read()
        .await
        .get(&job_id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))
}

/// POST /jobs
///
/// Preconditions are checked before the job is spawned, so a missing docket
/// or empty staging is reported synchronously. Returns 202 Accepted.
pub async fn start_job(
    State(state): State<AppState>,
    Json(request): Json<StartJobRequest>,
) -> ApiResult<(StatusCode, Json<StartJobResponse>)> {
    let entries = {
        let staging = state.staging.read().await;
        match &request.entry_ids {
            Some(ids) => {
                let mut selected = Vec::with_capacity(ids.len());
                for id in ids {
                    let entry = staging
                        .entries()
                        .iter()
                        .find(|e| e.id == *id)
                        .ok_or_else(|| ApiError::BadRequest(format!("Entry not staged: {}", id)))?;
                    selected.push(entry.clone());
                }
                selected
            }
            None => staging.entries().to_vec(),
        }
    };

    let date = request.date.unwrap_or_else(|| Local::now().date_naive());
    let mut job = JobRequest::new(entries, request.mode, request.docket.trim(), date)
        .with_prep_date(request.prep_date.unwrap_or(date));
    if let Some(checklist) = request.checklist {
        job = job.with_checklist(checklist);
    }
    if let Some(folder) = request.resume_folder {
        job = job.resume_into(folder);
    }
    let job_id = job.job_id;

    let pipeline = state.pipeline();
    if pipeline.check_preconditions(&job)? == Preflight::NothingSelected {
        let outcome = JobOutcome::empty(job_id, JobStatus::NothingSelected);
        return Ok((
            StatusCode::OK,
            Json(StartJobResponse {
                job_id,
                started: false,
                outcome: Some(outcome),
            }),
        ));
    }
    if state.active_dockets.is_active(&job.docket) {
        return Err(ApiError::Conflict(format!(
            "Docket {} is already being delivered",
            job.docket
        )));
    }

    state.prune_finished_jobs(finished_job_retention()).await;

    let (state_tx, state_rx) = watch::channel(JobRunState::new(job_id));
    let cancel = CancellationToken::new();
    let outcome_slot = Arc::new(RwLock::new(None));
    let finished_at = Arc::new(RwLock::new(None));
    state.jobs.write().await.insert(
        job_id,
        JobHandle {
            docket: job.docket.clone(),
            mode: job.mode,
            started_at: Utc::now(),
            cancel: cancel.clone(),
            state: state_rx,
            outcome: outcome_slot.clone(),
            finished_at: finished_at.clone(),
        },
    );

    tracing::info!(job_id = %job_id, docket = %job.docket, mode = ?job.mode, "Delivery job accepted");

    let last_error = state.last_error.clone();
    tokio::spawn(async move {
        let outcome = match pipeline.run(job, cancel, state_tx).await {
            Ok(outcome) => {
                if let Some(error) = &outcome.error {
                    *last_error.write().await = Some(error.clone());
                }
                outcome
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Delivery job did not start");
                *last_error.write().await = Some(e.to_string());
                let mut failed = JobOutcome::empty(job_id, JobStatus::Failed);
                failed.error = Some(e.to_string());
                failed
            }
        };
        tracing::info!(job_id = %job_id, result = %outcome, "Delivery job finished");
        *finished_at.write().await = Some(Utc::now());
        *outcome_slot.write().await = Some(outcome);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartJobResponse {
            job_id,
            started: true,
            outcome: None,
        }),
    ))
}

/// GET /jobs
///
/// Jobs finished longer ago than the retention window are dropped first.
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobStatusResponse>> {
    state.prune_finished_jobs(finished_job_retention()).await;
    let jobs: Vec<(Uuid, JobHandle)> = state
        .jobs
        .read()
        .await
        .iter()
        .map(|(id, handle)| (*id, handle.clone()))
        .collect();

    let mut statuses = Vec::with_capacity(jobs.len());
    for (job_id, handle) in &jobs {
        statuses.push(status_of(&state, *job_id, handle).await);
    }
    statuses.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Json(statuses)
}

/// GET /jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let handle = find_job(&state, job_id).await?;
    Ok(Json(status_of(&state, job_id, &handle).await))
}

/// POST /jobs/{job_id}/cancel
///
/// Cancellation is cooperative; poll the job for the final outcome.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let handle = find_job(&state, job_id).await?;
    if handle.outcome.read().await.is_some() {
        return Err(ApiError::BadRequest(format!("Job already finished: {}", job_id)));
    }
    handle.cancel.cancel();
    tracing::info!(job_id = %job_id, "Delivery job cancel requested");
    Ok(Json(status_of(&state, job_id, &handle).await))
}

/// POST /jobs/{job_id}/transcode
///
/// Body is a transcode decision, e.g. `{"decision":"accept","format":"mov","aspect_ratio":"16:9"}`.
pub async fn decide_transcode(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(decision): Json<TranscodeDecision>,
) -> ApiResult<Json<JobStatusResponse>> {
    let handle = find_job(&state, job_id).await?;
    if !state.transcode.answer(job_id, decision) {
        return Err(ApiError::Conflict(format!(
            "Job {} is not waiting for a transcode decision",
            job_id
        )));
    }
    Ok(Json(status_of(&state, job_id, &handle).await))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(start_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/jobs/:job_id/transcode", post(decide_transcode))
}
