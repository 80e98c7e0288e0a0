//! Data models for dkf-dlv
//!
//! - Staging set and entry identity
//! - Prep checklist sessions
//! - Job request/outcome and the per-run state snapshot

pub mod checklist;
pub mod job;
pub mod run_state;
pub mod staged_entry;

pub use checklist::{sanitize_title, PrepChecklistItem, PrepChecklistSession};
pub use job::{JobOutcome, JobRequest, JobStatus, TranscodeDecision, TranscodeOptions};
pub use run_state::JobRunState;
pub use staged_entry::{EntryId, StagedEntry, StagingSet};
