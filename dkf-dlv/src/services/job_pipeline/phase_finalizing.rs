//! Phase 3: FINALIZING
//!
//! Post-copy work on the prep folder, in order: stem grouping, checklist
//! placement, summary, watch. Only the checklist copies count as steps.

use super::{FlatFile, Halt, JobPipeline, RunContext};
use crate::models::JobRequest;
use crate::services::stem_organizer::group_stems;
use dkf_common::events::{CompletionState, JobPhase};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

impl JobPipeline {
    /// Phase 3: FINALIZING - stems, checklist, summary, watch
    pub(super) async fn phase_finalizing(
        &self,
        request: &JobRequest,
        docket: &str,
        checklist_files: &[&FlatFile],
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        ctx.transition(JobPhase::Finalizing);
        tracing::info!(job_id = %request.job_id, "Phase 3: FINALIZING");

        if let Some(prep_folder) = ctx.outcome.prep_folder.clone() {
            self.organize_stems(request, &prep_folder).await;

            self.place_checklist_files(request, checklist_files, &prep_folder, ctx, cancel)
                .await?;

            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            match self.summary.write_for(docket, &prep_folder).await {
                Ok(path) => ctx.outcome.summary_path = Some(path),
                Err(e) => {
                    tracing::warn!(job_id = %request.job_id, error = %e, "Prep summary not written");
                }
            }

            if let Some(registry) = &self.watch_registry {
                registry.arm_after(
                    docket.to_string(),
                    prep_folder.clone(),
                    Duration::from_millis(self.settings.watch.grace_ms),
                );
            }
        }

        for entry in &request.entries {
            ctx.advance(entry.id, CompletionState::Complete);
        }
        Ok(())
    }

    async fn organize_stems(&self, request: &JobRequest, prep_folder: &Path) {
        let music_dir = prep_folder.join(&self.settings.folders.music);
        let settings = self.settings.clone();
        match tokio::task::spawn_blocking(move || group_stems(&music_dir, &settings)).await {
            Ok(Ok(groups)) if !groups.is_empty() => {
                tracing::info!(job_id = %request.job_id, groups = groups.len(), "Stems grouped");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!(job_id = %request.job_id, error = %e, "Stem grouping failed");
            }
            Err(e) => {
                tracing::warn!(job_id = %request.job_id, error = %e, "Stem grouping task failed");
            }
        }
    }

    /// Copy each assigned file into every item folder it belongs to
    async fn place_checklist_files(
        &self,
        request: &JobRequest,
        checklist_files: &[&FlatFile],
        prep_folder: &Path,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        let Some(checklist) = &request.checklist else {
            return Ok(());
        };
        let checklist_dir = prep_folder.join(&self.settings.folders.checklist);

        for file in checklist_files {
            for item in checklist.items_for(file.entry) {
                if cancel.is_cancelled() {
                    return Err(Halt::Cancelled);
                }
                let dst = checklist_dir.join(item.folder_name()).join(file.file_name());
                ctx.copy_to(file, &dst, cancel).await?;
            }
            ctx.complete_step(file.entry);
        }

        let placed: HashSet<_> = checklist_files.iter().map(|f| f.entry).collect();
        for entry in placed {
            ctx.advance(entry, CompletionState::PrepDone);
        }
        Ok(())
    }
}
