//! Delivery job type definitions
//!
//! Supporting enums shared between the delivery pipeline, its HTTP surface and
//! the event stream.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a delivery job does with the staged files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// File into a numbered Work Picture delivery folder
    WorkPicture,
    /// Split into category folders of a prep folder
    Prep,
    /// Work Picture first, then Prep
    Both,
}

impl JobMode {
    /// Whether the Filing phase runs
    pub fn includes_work_picture(self) -> bool {
        matches!(self, JobMode::WorkPicture | JobMode::Both)
    }

    /// Whether the Prepping phase runs
    pub fn includes_prep(self) -> bool {
        matches!(self, JobMode::Prep | JobMode::Both)
    }

    /// Number of copy steps each flattened file contributes
    pub fn step_multiplier(self) -> usize {
        match self {
            JobMode::Both => 2,
            JobMode::WorkPicture | JobMode::Prep => 1,
        }
    }
}

/// Delivery job state machine
///
/// IDLE → FILING → PREPPING → FINALIZING → DONE | CANCELLED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobPhase {
    /// Job accepted, nothing copied yet
    Idle,
    /// Copying into the Work Picture delivery folder
    Filing,
    /// Copying into prep category folders
    Prepping,
    /// Stem grouping, checklist placement, summary
    Finalizing,
    /// Finished (possibly with per-file errors)
    Done,
    /// Cancelled by user
    Cancelled,
    /// Aborted by a fatal error
    Failed,
}

impl JobPhase {
    /// Terminal phases never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Done | JobPhase::Cancelled | JobPhase::Failed)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Idle => "IDLE",
            JobPhase::Filing => "FILING",
            JobPhase::Prepping => "PREPPING",
            JobPhase::Finalizing => "FINALIZING",
            JobPhase::Done => "DONE",
            JobPhase::Cancelled => "CANCELLED",
            JobPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Per staged entry completion marker
///
/// Ordering matters: states only ever move forward within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    #[default]
    None,
    WorkPicDone,
    PrepDone,
    Complete,
}

/// Scope of a docket/session index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchDomain {
    /// Audio sessions tree (year folders directly under the sessions root)
    Sessions,
    /// Work Picture docket folders (year folders → `<year>_<work picture>`)
    WorkPicture,
    /// Flat media postings folder
    MediaPostings,
}

impl SearchDomain {
    pub const ALL: [SearchDomain; 3] = [
        SearchDomain::Sessions,
        SearchDomain::WorkPicture,
        SearchDomain::MediaPostings,
    ];
}

impl fmt::Display for SearchDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchDomain::Sessions => "sessions",
            SearchDomain::WorkPicture => "work_picture",
            SearchDomain::MediaPostings => "media_postings",
        };
        f.write_str(name)
    }
}
