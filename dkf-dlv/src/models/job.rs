//! Delivery job request and outcome

use super::{PrepChecklistSession, StagedEntry};
use chrono::NaiveDate;
use dkf_common::events::JobMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Everything one pipeline run needs
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: Uuid,
    pub entries: Vec<StagedEntry>,
    pub mode: JobMode,
    /// Docket as typed by the user, e.g. `12345`
    pub docket: String,
    pub work_picture_date: NaiveDate,
    pub prep_date: NaiveDate,
    pub checklist: Option<PrepChecklistSession>,
    /// Existing delivery folder to fill instead of allocating a new one
    pub resume_folder: Option<PathBuf>,
}

impl JobRequest {
    pub fn new(
        entries: Vec<StagedEntry>,
        mode: JobMode,
        docket: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            entries,
            mode,
            docket: docket.into(),
            work_picture_date: date,
            prep_date: date,
            checklist: None,
            resume_folder: None,
        }
    }

    pub fn with_prep_date(mut self, date: NaiveDate) -> Self {
        self.prep_date = date;
        self
    }

    pub fn with_checklist(mut self, checklist: PrepChecklistSession) -> Self {
        self.checklist = Some(checklist);
        self
    }

    /// Re-run Filing into a delivery folder from an earlier run
    pub fn resume_into(mut self, folder: impl Into<PathBuf>) -> Self {
        self.resume_folder = Some(folder.into());
        self
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    CompletedWithErrors,
    Cancelled,
    Failed,
    /// Work Picture run started with nothing staged
    NothingSelected,
}

/// What a finished run reports back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub files_copied: usize,
    /// Already present at the destination (not failures)
    pub files_skipped: usize,
    pub failed_files: Vec<String>,
    pub delivery_folder: Option<PathBuf>,
    pub prep_folder: Option<PathBuf>,
    pub summary_path: Option<PathBuf>,
    /// Fatal error text for `Failed`
    #[serde(default)]
    pub error: Option<String>,
}

impl JobOutcome {
    pub(crate) fn empty(job_id: Uuid, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            files_copied: 0,
            files_skipped: 0,
            failed_files: Vec::new(),
            delivery_folder: None,
            prep_folder: None,
            summary_path: None,
            error: None,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::CompletedWithErrors => {
                write!(f, "Completed with {} errors", self.failed_files.len())
            }
            JobStatus::Cancelled => write!(f, "Cancelled"),
            JobStatus::NothingSelected => write!(f, "Select files to deliver"),
            JobStatus::Failed => write!(
                f,
                "Failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Options chosen when the user accepts transcoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeOptions {
    /// Target container/codec family, e.g. `mov` or `mp4`
    pub format: String,
    /// Display aspect ratio, e.g. `16:9`
    pub aspect_ratio: String,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            format: "mov".to_string(),
            aspect_ratio: "16:9".to_string(),
        }
    }
}

/// Answer to a transcode prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum TranscodeDecision {
    Decline,
    Accept(TranscodeOptions),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_display_distinguishes_cancelled_from_errors() {
        let id = Uuid::new_v4();
        let mut outcome = JobOutcome::empty(id, JobStatus::CompletedWithErrors);
        outcome.failed_files = vec!["a.mov".into(), "b.wav".into()];
        assert_eq!(outcome.to_string(), "Completed with 2 errors");

        let cancelled = JobOutcome::empty(id, JobStatus::Cancelled);
        assert_eq!(cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn transcode_decision_json_shape() {
        let accept: TranscodeDecision = serde_json::from_str(
            r#"{"decision":"accept","format":"mp4","aspect_ratio":"4:3"}"#,
        )
        .unwrap();
        assert_eq!(
            accept,
            TranscodeDecision::Accept(TranscodeOptions {
                format: "mp4".into(),
                aspect_ratio: "4:3".into()
            })
        );

        let decline: TranscodeDecision = serde_json::from_str(r#"{"decision":"decline"}"#).unwrap();
        assert_eq!(decline, TranscodeDecision::Decline);
    }
}
