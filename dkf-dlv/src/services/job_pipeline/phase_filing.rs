//! Phase 1: FILING
//!
//! Staged entries are copied whole into `<docket>/<NN>_<date>/`. Existing
//! destination files are skipped, failures are recorded and the run goes on.

use super::{FlatFile, Halt, JobPipeline, PipelineError, RunContext};
use crate::models::JobRequest;
use crate::services::sequence_allocator::allocate_folder;
use dkf_common::events::{CompletionState, JobPhase};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

impl JobPipeline {
    /// Phase 1: FILING - numbered Work Picture delivery
    ///
    /// Failure to create the delivery folder aborts the run.
    pub(super) async fn phase_filing(
        &self,
        request: &JobRequest,
        files: &[FlatFile],
        docket_folder: &Path,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        ctx.transition(JobPhase::Filing);

        let delivery = match &request.resume_folder {
            Some(folder) => folder.clone(),
            None => self.allocate_delivery_folder(request, docket_folder).await?,
        };
        tracing::info!(
            job_id = %request.job_id,
            folder = %delivery.display(),
            files = files.len(),
            "Phase 1: FILING"
        );
        ctx.outcome.delivery_folder = Some(delivery.clone());

        for file in files {
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            ctx.deliver(file, &delivery.join(&file.relative), cancel)
                .await?;
        }

        for entry in &request.entries {
            ctx.advance(entry.id, CompletionState::WorkPicDone);
        }
        Ok(())
    }

    async fn allocate_delivery_folder(
        &self,
        request: &JobRequest,
        docket_folder: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let date_text = self.paths().work_picture_date_text(request.work_picture_date);
        let base = docket_folder.to_path_buf();
        tokio::task::spawn_blocking(move || allocate_folder(&base, &date_text))
            .await
            .map_err(|e| PipelineError::Internal(format!("Folder allocation task failed: {}", e)))?
            .map_err(|source| PipelineError::Destination {
                path: docket_folder.to_path_buf(),
                source,
            })
    }
}
