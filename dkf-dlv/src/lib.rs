//! dkf-dlv library interface
//!
//! Delivery service: staging, docket search, delivery jobs and the prep
//! summary watch, exposed over HTTP + SSE.

pub mod api;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use dkf_common::events::{EventBus, JobMode};
use dkf_common::SettingsProvider;
use models::{JobOutcome, JobRunState, StagingSet};
use services::{
    ActiveDockets, ChannelTranscodeDecider, DocketIndexer, DocketMetadataProvider, DurationProbe,
    FfmpegConversionService, FfprobeDurationProbe, FolderNameMetadata, FuzzySearchEngine,
    JobPipeline, PrepSummaryGenerator, PrepWatchRegistry, SummaryRegenerator,
    VideoConversionService,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// A job started through the API
#[derive(Clone)]
pub struct JobHandle {
    pub docket: String,
    pub mode: JobMode,
    pub started_at: DateTime<Utc>,
    pub cancel: CancellationToken,
    /// Latest run state published by the pipeline
    pub state: watch::Receiver<JobRunState>,
    /// Set once the run returns
    pub outcome: Arc<RwLock<Option<JobOutcome>>>,
    pub finished_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsProvider>,
    /// Settings file reloaded by `POST /settings/reload`
    pub config_path: Option<PathBuf>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub indexer: Arc<DocketIndexer>,
    pub search: Arc<FuzzySearchEngine>,
    pub staging: Arc<RwLock<StagingSet>>,
    pub jobs: Arc<RwLock<HashMap<Uuid, JobHandle>>>,
    pub active_dockets: ActiveDockets,
    pub transcode: ChannelTranscodeDecider,
    pub summary: Arc<PrepSummaryGenerator>,
    pub conversion: Arc<dyn VideoConversionService>,
    pub watch_registry: Arc<PrepWatchRegistry>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// State with the subprocess-backed collaborators (`ffprobe`, `ffmpeg`)
    pub fn new(
        settings: Arc<SettingsProvider>,
        config_path: Option<PathBuf>,
        event_bus: EventBus,
    ) -> Self {
        let tools = settings.snapshot().tools.clone();
        let probe: Arc<dyn DurationProbe> = Arc::new(FfprobeDurationProbe::new(tools.ffprobe_path));
        let metadata: Arc<dyn DocketMetadataProvider> =
            Arc::new(FolderNameMetadata::new(settings.clone()));
        let conversion: Arc<dyn VideoConversionService> =
            Arc::new(FfmpegConversionService::new(tools.ffmpeg_path));
        Self::with_collaborators(settings, config_path, event_bus, probe, metadata, conversion)
    }

    pub fn with_collaborators(
        settings: Arc<SettingsProvider>,
        config_path: Option<PathBuf>,
        event_bus: EventBus,
        probe: Arc<dyn DurationProbe>,
        metadata: Arc<dyn DocketMetadataProvider>,
        conversion: Arc<dyn VideoConversionService>,
    ) -> Self {
        let indexer =
            Arc::new(DocketIndexer::new(settings.clone()).with_event_bus(event_bus.clone()));
        let search = Arc::new(FuzzySearchEngine::new(indexer.clone(), settings.clone()));
        let summary = Arc::new(
            PrepSummaryGenerator::new(settings.clone(), probe, metadata)
                .with_event_bus(event_bus.clone()),
        );
        let active_dockets = ActiveDockets::new();
        let watch_registry = Arc::new(PrepWatchRegistry::new(
            settings.clone(),
            Arc::new(SummaryRegenerator::new(summary.clone())),
            active_dockets.clone(),
        ));

        Self {
            settings,
            config_path,
            event_bus,
            indexer,
            search,
            staging: Arc::new(RwLock::new(StagingSet::new())),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            active_dockets,
            transcode: ChannelTranscodeDecider::new(),
            summary,
            conversion,
            watch_registry,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Pipeline bound to the current settings snapshot
    pub fn pipeline(&self) -> JobPipeline {
        JobPipeline::new(
            self.settings.snapshot(),
            self.event_bus.clone(),
            self.summary.clone(),
            self.conversion.clone(),
            Arc::new(self.transcode.clone()),
            self.active_dockets.clone(),
        )
        .with_watch_registry(self.watch_registry.clone())
    }

    /// Forget jobs that finished more than `retention` ago
    pub async fn prune_finished_jobs(&self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut jobs = self.jobs.write().await;
        let mut expired = Vec::new();
        for (job_id, handle) in jobs.iter() {
            if handle.finished_at.read().await.is_some_and(|t| t <= cutoff) {
                expired.push(*job_id);
            }
        }
        for job_id in &expired {
            jobs.remove(job_id);
        }
        if !expired.is_empty() {
            tracing::debug!(pruned = expired.len(), "Finished jobs pruned");
        }
        expired.len()
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::staging_routes())
        .merge(api::search_routes())
        .merge(api::demo_routes())
        .merge(api::job_routes())
        .merge(api::settings_routes())
        .merge(api::event_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
