//! Delivery job pipeline
//!
//! # State Progression
//! IDLE → FILING → PREPPING → FINALIZING → DONE | CANCELLED | FAILED
//!
//! Each state is handled by a dedicated `phase_*` method:
//!
//! - **FILING**: copy staged entries whole into a numbered Work Picture
//!   delivery folder under the docket
//! - **PREPPING**: split flattened files into category folders of the prep
//!   folder; video files wait for a transcode decision
//! - **FINALIZING**: stem grouping, checklist placement, summary, watch
//!
//! Precondition failures are returned as `Err` before anything is written.
//! Once files start moving the run always returns an outcome, so a failed or
//! cancelled run still reports what was copied.

use crate::models::{
    EntryId, JobOutcome, JobRequest, JobRunState, JobStatus, StagedEntry,
};
use crate::models::staged_entry::is_ignored_name;
use crate::services::file_copier::{copy_file, CopyError, CopyLimits, CopyOutcome};
use crate::services::path_config::{DocketLocation, PathConfig};
use crate::services::prep_summary::PrepSummaryGenerator;
use crate::services::prep_watcher::{ActiveDockets, PrepWatchRegistry};
use crate::services::video_conversion::VideoConversionService;
use chrono::{Datelike, Utc};
use dkf_common::events::{CompletionState, DeliveryEvent, EventBus, JobMode, JobPhase};
use dkf_common::Settings;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

mod phase_filing;
mod phase_finalizing;
mod phase_prepping;
pub mod transcode;

pub use transcode::{ChannelTranscodeDecider, FixedTranscodeDecision, TranscodeDecider};

/// Minimum spacing of byte-level progress publications
const FINE_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that stop a run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Nothing staged for delivery")]
    NothingStaged,

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Docket {docket} has no Work Picture folder (expected {expected})")]
    DocketNotFound { docket: String, expected: PathBuf },

    #[error("Docket {0} is already being delivered")]
    DocketBusy(String),

    #[error("Cannot create destination {path}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result of the precondition check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preflight {
    /// Run may start; `docket_folder` is set when Filing runs
    Ready { docket_folder: Option<PathBuf> },
    /// Work Picture run with nothing staged
    NothingSelected,
}

/// Why a phase stopped early
pub(super) enum Halt {
    Cancelled,
    Fatal(PipelineError),
}

impl From<PipelineError> for Halt {
    fn from(e: PipelineError) -> Self {
        Halt::Fatal(e)
    }
}

/// One file of a staged entry after flattening
#[derive(Debug, Clone)]
pub struct FlatFile {
    pub entry: EntryId,
    pub source: PathBuf,
    /// Path below a delivery folder: `<dir name>/<inner path>` or the file name
    pub relative: PathBuf,
}

impl FlatFile {
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Expand staged entries into files, in staging order
///
/// Directories are walked recursively by name, skipping hidden and OS clutter
/// files. A staged file is always included so a vanished source is reported
/// as a copy failure rather than silently dropped.
pub fn flatten_entries(entries: &[StagedEntry]) -> Vec<FlatFile> {
    let mut files = Vec::new();
    for entry in entries {
        if !entry.is_directory {
            let name = entry
                .path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&entry.display_name));
            files.push(FlatFile {
                entry: entry.id,
                source: entry.path.clone(),
                relative: name,
            });
            continue;
        }

        let dir_name = entry
            .path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&entry.display_name));
        let walker = WalkDir::new(&entry.path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored_name(&e.file_name().to_string_lossy()));
        for item in walker {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    warn!(entry = %entry.path.display(), error = %e, "Skipping unreadable path");
                    continue;
                }
            };
            if !item.file_type().is_file() {
                continue;
            }
            let Ok(inner) = item.path().strip_prefix(&entry.path) else {
                continue;
            };
            files.push(FlatFile {
                entry: entry.id,
                source: item.path().to_path_buf(),
                relative: dir_name.join(inner),
            });
        }
    }
    files
}

/// Per-run bookkeeping shared by the phases
pub(super) struct RunContext {
    job_id: Uuid,
    state: JobRunState,
    state_tx: watch::Sender<JobRunState>,
    event_bus: EventBus,
    outcome: JobOutcome,
    limits: CopyLimits,
    last_fine_publish: Instant,
}

impl RunContext {
    fn new(
        job_id: Uuid,
        state_tx: watch::Sender<JobRunState>,
        event_bus: EventBus,
        limits: CopyLimits,
    ) -> Self {
        Self {
            job_id,
            state: JobRunState::new(job_id),
            state_tx,
            event_bus,
            outcome: JobOutcome::empty(job_id, JobStatus::Completed),
            limits,
            last_fine_publish: Instant::now(),
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    fn emit_progress(&self) {
        self.event_bus.emit_lossy(DeliveryEvent::JobProgress {
            job_id: self.job_id,
            progress: self.state.progress,
            fine_progress: self.state.fine_progress,
            current_file: self.state.current_file.clone(),
            timestamp: Utc::now(),
        });
    }

    pub(super) fn transition(&mut self, phase: JobPhase) {
        let old_phase = self.state.phase;
        if old_phase == phase {
            return;
        }
        self.state.phase = phase;
        self.publish();
        info!(job_id = %self.job_id, phase = %phase, "Job phase changed");
        self.event_bus.emit_lossy(DeliveryEvent::JobPhaseChanged {
            job_id: self.job_id,
            old_phase,
            new_phase: phase,
            timestamp: Utc::now(),
        });
    }

    fn fine_progress(&mut self, written: u64, total: u64) {
        if total == 0 {
            return;
        }
        let moved = self.state.set_step_fraction(written as f64 / total as f64);
        if moved && self.last_fine_publish.elapsed() >= FINE_PROGRESS_INTERVAL {
            self.last_fine_publish = Instant::now();
            self.publish();
            self.emit_progress();
        }
    }

    /// One file processed (copied, skipped or failed)
    pub(super) fn complete_step(&mut self, entry: EntryId) {
        let entry_progress = self.state.complete_step(entry);
        self.publish();
        self.emit_progress();
        debug!(job_id = %self.job_id, entry = %entry, entry_progress, "Step complete");
    }

    pub(super) fn advance(&mut self, entry: EntryId, completion: CompletionState) {
        if !self.state.advance(entry, completion) {
            return;
        }
        self.publish();
        self.event_bus.emit_lossy(DeliveryEvent::EntryStateChanged {
            job_id: self.job_id,
            entry_id: entry,
            entry_progress: self.state.entry_progress.get(&entry).copied().unwrap_or(0.0),
            state: completion,
            timestamp: Utc::now(),
        });
    }

    /// Copy one flattened file without counting a step
    ///
    /// Returns `true` when the destination now holds the file (copied or
    /// already present). Failures are recorded and the run continues.
    pub(super) async fn copy_to(
        &mut self,
        file: &FlatFile,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, Halt> {
        let name = file.file_name();
        self.state.current_file = Some(name.clone());
        let limits = self.limits;
        let result = copy_file(&file.source, dst, &limits, cancel, |written, total| {
            self.fine_progress(written, total)
        })
        .await;

        match result {
            Ok(CopyOutcome::Copied(bytes)) => {
                self.outcome.files_copied += 1;
                debug!(job_id = %self.job_id, file = %dst.display(), bytes, "Copied");
                Ok(true)
            }
            Ok(CopyOutcome::SkippedExisting) => {
                self.outcome.files_skipped += 1;
                Ok(true)
            }
            Err(CopyError::Cancelled) => Err(Halt::Cancelled),
            Err(e) => {
                warn!(job_id = %self.job_id, file = %name, error = %e, "Copy failed");
                self.state.record_failure(name);
                Ok(false)
            }
        }
    }

    /// Count a file already present elsewhere in the destination
    pub(super) fn skip_existing(&mut self, entry: EntryId) {
        self.outcome.files_skipped += 1;
        self.complete_step(entry);
    }

    /// Copy and count one step
    pub(super) async fn deliver(
        &mut self,
        file: &FlatFile,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, Halt> {
        let delivered = self.copy_to(file, dst, cancel).await?;
        self.complete_step(file.entry);
        Ok(delivered)
    }

    fn finish(mut self, duration: Duration) -> JobOutcome {
        self.state.finish();
        self.outcome.failed_files = self.state.failed_files.clone();
        self.outcome.status = if self.outcome.failed_files.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithErrors
        };
        self.transition(JobPhase::Done);
        self.emit_progress();
        self.event_bus.emit_lossy(DeliveryEvent::JobCompleted {
            job_id: self.job_id,
            files_copied: self.outcome.files_copied,
            files_skipped: self.outcome.files_skipped,
            failed_files: self.outcome.failed_files.clone(),
            duration_seconds: duration.as_secs(),
            timestamp: Utc::now(),
        });
        info!(
            job_id = %self.job_id,
            copied = self.outcome.files_copied,
            skipped = self.outcome.files_skipped,
            failed = self.outcome.failed_files.len(),
            duration_ms = duration.as_millis() as u64,
            "Delivery job completed"
        );
        self.outcome
    }

    fn cancelled(mut self) -> JobOutcome {
        self.state.cancelled = true;
        self.state.current_file = None;
        self.outcome.failed_files = self.state.failed_files.clone();
        self.outcome.status = JobStatus::Cancelled;
        self.transition(JobPhase::Cancelled);
        self.event_bus.emit_lossy(DeliveryEvent::JobCancelled {
            job_id: self.job_id,
            files_copied: self.outcome.files_copied,
            timestamp: Utc::now(),
        });
        info!(
            job_id = %self.job_id,
            copied = self.outcome.files_copied,
            "Delivery job cancelled"
        );
        self.outcome
    }

    fn failed(mut self, err: PipelineError) -> JobOutcome {
        error!(job_id = %self.job_id, error = %err, "Delivery job failed");
        self.state.current_file = None;
        self.outcome.failed_files = self.state.failed_files.clone();
        self.outcome.status = JobStatus::Failed;
        self.outcome.error = Some(err.to_string());
        self.transition(JobPhase::Failed);
        self.event_bus.emit_lossy(DeliveryEvent::JobFailed {
            job_id: self.job_id,
            error_message: err.to_string(),
            timestamp: Utc::now(),
        });
        self.outcome
    }
}

/// Runs delivery jobs against one settings snapshot
pub struct JobPipeline {
    settings: Arc<Settings>,
    event_bus: EventBus,
    summary: Arc<PrepSummaryGenerator>,
    conversion: Arc<dyn VideoConversionService>,
    decider: Arc<dyn TranscodeDecider>,
    active: ActiveDockets,
    watch_registry: Option<Arc<PrepWatchRegistry>>,
}

impl JobPipeline {
    pub fn new(
        settings: Arc<Settings>,
        event_bus: EventBus,
        summary: Arc<PrepSummaryGenerator>,
        conversion: Arc<dyn VideoConversionService>,
        decider: Arc<dyn TranscodeDecider>,
        active: ActiveDockets,
    ) -> Self {
        Self {
            settings,
            event_bus,
            summary,
            conversion,
            decider,
            active,
            watch_registry: None,
        }
    }

    /// Arm a prep folder watch after each run that produced a prep folder
    pub fn with_watch_registry(mut self, registry: Arc<PrepWatchRegistry>) -> Self {
        self.watch_registry = Some(registry);
        self
    }

    fn paths(&self) -> PathConfig {
        PathConfig::new(self.settings.clone())
    }

    /// Validate a request without touching the destination tree
    pub fn check_preconditions(&self, request: &JobRequest) -> Result<Preflight, PipelineError> {
        self.settings
            .validate()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        let paths = self.paths();
        if !paths.server_root().is_dir() {
            return Err(PipelineError::Configuration(format!(
                "Server root {} does not exist",
                paths.server_root().display()
            )));
        }

        if request.entries.is_empty() {
            return match request.mode {
                JobMode::WorkPicture => Ok(Preflight::NothingSelected),
                JobMode::Prep | JobMode::Both => Err(PipelineError::NothingStaged),
            };
        }

        if request.docket.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "Docket number is required".to_string(),
            ));
        }

        if request.mode.includes_prep() {
            let prep_root = paths.prep_folder(request.prep_date.year());
            if !prep_root.is_dir() {
                return Err(PipelineError::Configuration(format!(
                    "Prep folder {} does not exist",
                    prep_root.display()
                )));
            }
        }

        if !request.mode.includes_work_picture() {
            return Ok(Preflight::Ready {
                docket_folder: None,
            });
        }

        let year = request.work_picture_date.year();
        let docket_folder = match paths.locate_docket_work_picture(request.docket.trim(), year) {
            DocketLocation::Found(folder) => folder,
            DocketLocation::Missing { expected } => {
                return Err(PipelineError::DocketNotFound {
                    docket: request.docket.clone(),
                    expected,
                })
            }
        };

        if let Some(resume) = &request.resume_folder {
            if resume.parent() != Some(docket_folder.as_path()) || !resume.is_dir() {
                return Err(PipelineError::InvalidRequest(format!(
                    "{} is not a delivery folder of docket {}",
                    resume.display(),
                    request.docket
                )));
            }
        }

        Ok(Preflight::Ready {
            docket_folder: Some(docket_folder),
        })
    }

    /// Execute one delivery job
    ///
    /// Snapshots of the run state are published on `state_tx` as the run
    /// advances; `cancel` is honored between files and inside copies.
    pub async fn run(
        &self,
        request: JobRequest,
        cancel: CancellationToken,
        state_tx: watch::Sender<JobRunState>,
    ) -> Result<JobOutcome, PipelineError> {
        let start_time = Instant::now();

        let docket_folder = match self.check_preconditions(&request)? {
            Preflight::NothingSelected => {
                info!(job_id = %request.job_id, "Work Picture job with nothing staged");
                return Ok(JobOutcome::empty(request.job_id, JobStatus::NothingSelected));
            }
            Preflight::Ready { docket_folder } => docket_folder,
        };

        let docket = request.docket.trim().to_string();
        let _active = self
            .active
            .try_activate(&docket)
            .ok_or_else(|| PipelineError::DocketBusy(docket.clone()))?;

        let entries = request.entries.clone();
        let files = tokio::task::spawn_blocking(move || flatten_entries(&entries))
            .await
            .map_err(|e| PipelineError::Internal(format!("Flattening task failed: {}", e)))?;

        let mut ctx = RunContext::new(
            request.job_id,
            state_tx,
            self.event_bus.clone(),
            CopyLimits::from_settings(&self.settings.copy),
        );
        let mut per_entry: Vec<(EntryId, usize)> =
            request.entries.iter().map(|e| (e.id, 0)).collect();
        for file in &files {
            if let Some(slot) = per_entry.iter_mut().find(|(id, _)| *id == file.entry) {
                slot.1 += 1;
            }
        }
        ctx.state.plan(&per_entry, request.mode);
        ctx.publish();

        info!(
            job_id = %request.job_id,
            docket = %docket,
            mode = ?request.mode,
            files = files.len(),
            "Starting delivery job"
        );
        self.event_bus.emit_lossy(DeliveryEvent::JobStarted {
            job_id: request.job_id,
            docket: docket.clone(),
            mode: request.mode,
            total_files: files.len(),
            timestamp: Utc::now(),
        });

        let result = self
            .execute(&request, &docket, &files, docket_folder, &mut ctx, &cancel)
            .await;

        let outcome = match result {
            Ok(()) => ctx.finish(start_time.elapsed()),
            Err(Halt::Cancelled) => ctx.cancelled(),
            Err(Halt::Fatal(e)) => ctx.failed(e),
        };
        Ok(outcome)
    }

    async fn execute(
        &self,
        request: &JobRequest,
        docket: &str,
        files: &[FlatFile],
        docket_folder: Option<PathBuf>,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        // Phase 1: FILING
        if let Some(docket_folder) = docket_folder {
            self.phase_filing(request, files, &docket_folder, ctx, cancel)
                .await?;
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
        }

        // Phase 2: PREPPING
        let mut checklist_files = Vec::new();
        if request.mode.includes_prep() {
            checklist_files = self
                .phase_prepping(request, docket, files, ctx, cancel)
                .await?;
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
        }

        // Phase 3: FINALIZING
        self.phase_finalizing(request, docket, &checklist_files, ctx, cancel)
            .await
    }
}
