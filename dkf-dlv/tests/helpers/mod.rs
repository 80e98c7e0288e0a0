//! Shared fixtures for dkf-dlv integration tests
//!
//! A temp server tree, a duration probe that reads the length from the file
//! name (`spot_30.mov` → 30 s) and a conversion service that only records.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use dkf_common::events::{DeliveryEvent, EventBus};
use dkf_common::{Settings, SettingsProvider};
use dkf_dlv::models::{JobOutcome, JobRequest, JobRunState};
use dkf_dlv::services::{
    ActiveDockets, ConversionError, ConversionId, ConversionProgress, ConversionRequest,
    DocketMetadataProvider, DurationProbe, FolderNameMetadata, JobPipeline, PathConfig,
    PipelineError, PrepSummaryGenerator, ProbeError, TranscodeDecider, VideoConversionService,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DOCKET: &str = "12345";

pub fn delivery_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

/// `%b%d.%y` of [`delivery_date`]
pub const DATE_TEXT: &str = "Oct16.26";

pub struct NameProbe;

#[async_trait]
impl DurationProbe for NameProbe {
    async fn probe(&self, path: &Path) -> Result<Option<f64>, ProbeError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        stem.rsplit('_')
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .map(Some)
            .ok_or_else(|| ProbeError::Failed {
                path: path.to_path_buf(),
                message: "no duration in name".into(),
            })
    }
}

#[derive(Default)]
pub struct RecordingConversion {
    pub requests: Mutex<Vec<ConversionRequest>>,
    pub started: AtomicBool,
}

impl RecordingConversion {
    pub fn requests(&self) -> Vec<ConversionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoConversionService for RecordingConversion {
    async fn enqueue(&self, request: ConversionRequest) -> Result<ConversionId, ConversionError> {
        self.requests.lock().unwrap().push(request);
        Ok(Uuid::new_v4())
    }

    fn progress(&self, _id: ConversionId) -> Option<ConversionProgress> {
        None
    }

    async fn start(&self) -> Result<(), ConversionError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Server, sessions and source trees under one temp dir
pub struct Fixture {
    pub dir: TempDir,
    pub provider: Arc<SettingsProvider>,
    pub event_bus: EventBus,
    pub conversion: Arc<RecordingConversion>,
    pub active: ActiveDockets,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(adjust: impl FnOnce(&mut Settings)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.paths.server_base_path = dir.path().join("server");
        settings.paths.sessions_base_path = dir.path().join("sessions");
        settings.paths.media_postings_path = dir.path().join("postings");
        settings.watch.debounce_ms = 150;
        settings.watch.grace_ms = 50;
        adjust(&mut settings);

        fs::create_dir_all(&settings.paths.server_base_path).unwrap();
        fs::create_dir_all(dir.path().join("source")).unwrap();
        let provider = Arc::new(SettingsProvider::new(settings));
        fs::create_dir_all(PathConfig::new(provider.snapshot()).prep_folder(2026)).unwrap();

        Self {
            dir,
            provider,
            event_bus: EventBus::new(1024),
            conversion: Arc::new(RecordingConversion::default()),
            active: ActiveDockets::new(),
        }
    }

    pub fn paths(&self) -> PathConfig {
        PathConfig::new(self.provider.snapshot())
    }

    /// Write a source file below `<tmp>/source`
    pub fn source(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join("source").join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
        path
    }

    pub fn source_path(&self, relative: &str) -> PathBuf {
        self.dir.path().join("source").join(relative)
    }

    /// Create a docket folder in the 2026 Work Picture tree
    pub fn docket_folder(&self, name: &str) -> PathBuf {
        let folder = self.paths().work_picture_folder(2026).join(name);
        fs::create_dir_all(&folder).unwrap();
        folder
    }

    pub fn prep_folder(&self) -> PathBuf {
        let paths = self.paths();
        paths
            .prep_folder(2026)
            .join(paths.prep_folder_name(DOCKET, delivery_date()))
    }

    pub fn metadata(&self) -> Arc<dyn DocketMetadataProvider> {
        Arc::new(FolderNameMetadata::new(self.provider.clone()))
    }

    pub fn summary_generator(&self) -> Arc<PrepSummaryGenerator> {
        Arc::new(
            PrepSummaryGenerator::new(self.provider.clone(), Arc::new(NameProbe), self.metadata())
                .with_event_bus(self.event_bus.clone()),
        )
    }

    pub fn pipeline(&self, decider: Arc<dyn TranscodeDecider>) -> JobPipeline {
        JobPipeline::new(
            self.provider.snapshot(),
            self.event_bus.clone(),
            self.summary_generator(),
            self.conversion.clone(),
            decider,
            self.active.clone(),
        )
    }
}

/// Run to completion, returning the outcome and the last published state
pub async fn run_job(
    pipeline: &JobPipeline,
    request: JobRequest,
) -> Result<(JobOutcome, JobRunState), PipelineError> {
    run_job_with(pipeline, request, CancellationToken::new()).await
}

pub async fn run_job_with(
    pipeline: &JobPipeline,
    request: JobRequest,
    cancel: CancellationToken,
) -> Result<(JobOutcome, JobRunState), PipelineError> {
    let (tx, rx) = watch::channel(JobRunState::new(request.job_id));
    let outcome = pipeline.run(request, cancel, tx).await?;
    let state = rx.borrow().clone();
    Ok((outcome, state))
}

/// Everything already published on a subscription
pub fn drain(rx: &mut broadcast::Receiver<DeliveryEvent>) -> Vec<DeliveryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Relative paths of all files below `root`, sorted
pub fn tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}
