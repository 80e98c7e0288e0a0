//! Mutable state of one pipeline run
//!
//! Owned by the pipeline and published as snapshots; observers never mutate it.

use super::EntryId;
use dkf_common::events::{CompletionState, JobMode, JobPhase};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunState {
    pub job_id: Uuid,
    pub phase: JobPhase,
    /// Completed steps / total steps (0.0 - 1.0)
    pub progress: f64,
    /// `progress` plus the byte fraction of the copy in flight
    pub fine_progress: f64,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub entry_progress: HashMap<EntryId, f64>,
    pub completion: HashMap<EntryId, CompletionState>,
    pub cancelled: bool,
    pub failed_files: Vec<String>,
    pub current_file: Option<String>,
    /// Steps each entry contributes over the whole run
    #[serde(skip)]
    entry_steps: HashMap<EntryId, usize>,
    #[serde(skip)]
    entry_done: HashMap<EntryId, usize>,
}

impl JobRunState {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            phase: JobPhase::Idle,
            progress: 0.0,
            fine_progress: 0.0,
            completed_steps: 0,
            total_steps: 0,
            entry_progress: HashMap::new(),
            completion: HashMap::new(),
            cancelled: false,
            failed_files: Vec::new(),
            current_file: None,
            entry_steps: HashMap::new(),
            entry_done: HashMap::new(),
        }
    }

    /// Size the run once the staged entries are flattened
    ///
    /// Total steps = flattened files × (2 for Both, else 1).
    pub fn plan(&mut self, files_per_entry: &[(EntryId, usize)], mode: JobMode) {
        let multiplier = mode.step_multiplier();
        self.total_steps = 0;
        for (entry, files) in files_per_entry {
            let steps = files * multiplier;
            self.total_steps += steps;
            self.entry_steps.insert(*entry, steps);
            self.entry_done.insert(*entry, 0);
            self.entry_progress.insert(*entry, 0.0);
            self.completion.insert(*entry, CompletionState::None);
        }
    }

    /// Count one processed file (copied, skipped, or failed)
    ///
    /// Returns the entry's new progress fraction.
    pub fn complete_step(&mut self, entry: EntryId) -> f64 {
        if self.completed_steps < self.total_steps {
            self.completed_steps += 1;
        }
        let progress = if self.total_steps == 0 {
            0.0
        } else {
            self.completed_steps as f64 / self.total_steps as f64
        };
        self.progress = self.progress.max(progress);
        self.fine_progress = self.fine_progress.max(self.progress);

        let steps = self.entry_steps.get(&entry).copied().unwrap_or(0);
        let done = self.entry_done.entry(entry).or_insert(0);
        if *done < steps {
            *done += 1;
        }
        let fraction = if steps == 0 { 1.0 } else { *done as f64 / steps as f64 };
        let slot = self.entry_progress.entry(entry).or_insert(0.0);
        *slot = slot.max(fraction);
        *slot
    }

    /// Interpolate inside the current step by bytes written
    ///
    /// Returns `true` when the fine value moved.
    pub fn set_step_fraction(&mut self, fraction: f64) -> bool {
        if self.total_steps == 0 {
            return false;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let fine = ((self.completed_steps as f64 + fraction) / self.total_steps as f64).min(1.0);
        if fine > self.fine_progress {
            self.fine_progress = fine;
            true
        } else {
            false
        }
    }

    /// Move an entry forward; never regresses
    ///
    /// Returns `true` when the state changed.
    pub fn advance(&mut self, entry: EntryId, state: CompletionState) -> bool {
        let current = self.completion.entry(entry).or_default();
        if state > *current {
            *current = state;
            true
        } else {
            false
        }
    }

    pub fn record_failure(&mut self, file_name: impl Into<String>) {
        self.failed_files.push(file_name.into());
    }

    /// Successful completion pins both progress values to 1.0
    pub fn finish(&mut self) {
        self.completed_steps = self.total_steps;
        self.progress = 1.0;
        self.fine_progress = 1.0;
        self.current_file = None;
        for value in self.entry_progress.values_mut() {
            *value = 1.0;
        }
    }

    /// Entries planned for this run
    pub fn entries(&self) -> impl Iterator<Item = &EntryId> {
        self.entry_steps.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_mode_doubles_steps() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut state = JobRunState::new(Uuid::new_v4());
        state.plan(&[(a, 2), (b, 1)], JobMode::Both);
        assert_eq!(state.total_steps, 6);

        state.complete_step(a);
        assert!((state.progress - 1.0 / 6.0).abs() < 1e-9);
        assert!((state.entry_progress[&a] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn fine_progress_never_decreases() {
        let a = Uuid::new_v4();
        let mut state = JobRunState::new(Uuid::new_v4());
        state.plan(&[(a, 4)], JobMode::Prep);

        assert!(state.set_step_fraction(0.5));
        let after_half = state.fine_progress;
        assert!(!state.set_step_fraction(0.25));
        assert_eq!(state.fine_progress, after_half);

        state.complete_step(a);
        assert!(state.fine_progress >= after_half);
        assert!((state.progress - 0.25).abs() < 1e-9);
    }

    #[test]
    fn completion_state_never_regresses() {
        let a = Uuid::new_v4();
        let mut state = JobRunState::new(Uuid::new_v4());
        state.plan(&[(a, 1)], JobMode::Both);

        assert!(state.advance(a, CompletionState::WorkPicDone));
        assert!(state.advance(a, CompletionState::Complete));
        assert!(!state.advance(a, CompletionState::PrepDone));
        assert_eq!(state.completion[&a], CompletionState::Complete);
    }

    #[test]
    fn steps_are_capped_at_total() {
        let a = Uuid::new_v4();
        let mut state = JobRunState::new(Uuid::new_v4());
        state.plan(&[(a, 1)], JobMode::WorkPicture);
        state.complete_step(a);
        state.complete_step(a);
        assert_eq!(state.completed_steps, 1);
        assert_eq!(state.progress, 1.0);
        assert_eq!(state.entry_progress[&a], 1.0);
    }

    #[test]
    fn finish_pins_progress() {
        let mut state = JobRunState::new(Uuid::new_v4());
        state.plan(&[], JobMode::Prep);
        state.finish();
        assert_eq!(state.progress, 1.0);
        assert_eq!(state.fine_progress, 1.0);
    }
}
