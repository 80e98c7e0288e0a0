//! Phase 2: PREPPING
//!
//! Flattened files are routed by extension into the category folders of
//! `<prep root>/<docket>_PREP_<date>/`. Files assigned to a checklist item are
//! held back for the FINALIZING checklist pass.

use super::{FlatFile, Halt, JobPipeline, PipelineError, RunContext};
use crate::models::{JobRequest, TranscodeDecision, TranscodeOptions};
use crate::services::categorizer::{self, FileCategory};
use crate::services::stem_organizer;
use crate::services::video_conversion::{ConversionNaming, ConversionRequest};
use chrono::{Datelike, Utc};
use dkf_common::events::{CompletionState, DeliveryEvent, JobPhase};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

impl JobPipeline {
    /// Phase 2: PREPPING - category split into the prep folder
    ///
    /// Returns the checklist-assigned files, which are not copied here.
    pub(super) async fn phase_prepping<'a>(
        &self,
        request: &JobRequest,
        docket: &str,
        files: &'a [FlatFile],
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<&'a FlatFile>, Halt> {
        ctx.transition(JobPhase::Prepping);

        let paths = self.paths();
        let prep_folder = paths
            .prep_folder(request.prep_date.year())
            .join(paths.prep_folder_name(docket, request.prep_date));
        // The prep root was checked up front; only the docket leaf is created
        match tokio::fs::create_dir(&prep_folder).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && prep_folder.is_dir() => {}
            Err(source) => {
                return Err(PipelineError::Destination {
                    path: prep_folder.clone(),
                    source,
                }
                .into())
            }
        }
        tracing::info!(
            job_id = %request.job_id,
            folder = %prep_folder.display(),
            "Phase 2: PREPPING"
        );
        ctx.outcome.prep_folder = Some(prep_folder.clone());

        let settings = self.settings.as_ref();
        let mut checklist_files = Vec::new();
        let mut routed: Vec<(&FlatFile, FileCategory)> = Vec::new();
        for file in files {
            let assigned = request
                .checklist
                .as_ref()
                .is_some_and(|c| c.is_assigned(file.entry));
            if assigned {
                checklist_files.push(file);
                continue;
            }
            match categorizer::route(&file.source, settings) {
                Some(category) => routed.push((file, category)),
                None => {
                    tracing::debug!(file = %file.source.display(), "No enabled category, skipping");
                    ctx.complete_step(file.entry);
                }
            }
        }

        let videos: Vec<&FlatFile> = routed
            .iter()
            .filter(|(file, category)| {
                *category == FileCategory::Picture && categorizer::is_video(&file.source, settings)
            })
            .map(|(file, _)| *file)
            .collect();
        let transcode = if videos.is_empty() {
            None
        } else {
            self.request_transcode_decision(ctx, &videos, cancel).await?
        };

        let picture_dir = prep_folder.join(&settings.folders.picture);
        let unconverted_dir = picture_dir.join(&settings.folders.unconverted);
        let held: HashSet<PathBuf> = if transcode.is_some() {
            videos.iter().map(|f| f.source.clone()).collect()
        } else {
            HashSet::new()
        };

        let mut originals = Vec::new();
        for (file, category) in &routed {
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            let is_held = held.contains(&file.source);
            let folder = if is_held {
                unconverted_dir.clone()
            } else {
                prep_folder.join(category.folder_name(settings))
            };
            let name = file.file_name();
            if !is_held && *category == FileCategory::Music {
                let keywords = &settings.categories.stem_keywords;
                if let Some(grouped) = stem_organizer::grouped_copy(&folder, &name, keywords) {
                    tracing::debug!(file = %grouped.display(), "Stem already grouped, skipping");
                    ctx.skip_existing(file.entry);
                    continue;
                }
            }
            let dst = folder.join(name);
            if ctx.deliver(file, &dst, cancel).await? && is_held {
                originals.push(dst);
            }
        }

        if let Some(options) = transcode {
            self.hand_off_conversion(request, options, originals, picture_dir)
                .await;
        }

        let assigned: HashSet<_> = checklist_files.iter().map(|f| f.entry).collect();
        for entry in &request.entries {
            if !assigned.contains(&entry.id) {
                ctx.advance(entry.id, CompletionState::PrepDone);
            }
        }
        Ok(checklist_files)
    }

    /// Pause until the decider answers, still honoring cancellation
    async fn request_transcode_decision(
        &self,
        ctx: &mut RunContext,
        videos: &[&FlatFile],
        cancel: &CancellationToken,
    ) -> Result<Option<TranscodeOptions>, Halt> {
        let names: Vec<String> = videos.iter().map(|f| f.file_name()).collect();
        self.event_bus.emit_lossy(DeliveryEvent::TranscodeDecisionRequested {
            job_id: ctx.job_id,
            files: names.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(job_id = %ctx.job_id, videos = names.len(), "Waiting for transcode decision");

        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Halt::Cancelled),
            decision = self.decider.decide(ctx.job_id, &names) => decision,
        };
        Ok(match decision {
            TranscodeDecision::Decline => None,
            TranscodeDecision::Accept(options) => Some(options),
        })
    }

    /// Queue staged originals for conversion into PICTURE
    ///
    /// Conversion problems never fail the delivery.
    async fn hand_off_conversion(
        &self,
        request: &JobRequest,
        options: TranscodeOptions,
        originals: Vec<PathBuf>,
        picture_dir: PathBuf,
    ) {
        if originals.is_empty() {
            return;
        }
        let batch = ConversionRequest {
            sources: originals,
            format: options.format,
            aspect_ratio: options.aspect_ratio,
            output_dir: picture_dir,
            naming: ConversionNaming::SameName,
        };
        match self.conversion.enqueue(batch).await {
            Ok(conversion_id) => {
                tracing::info!(
                    job_id = %request.job_id,
                    conversion_id = %conversion_id,
                    "Videos handed to conversion"
                );
                if let Err(e) = self.conversion.start().await {
                    tracing::warn!(job_id = %request.job_id, error = %e, "Conversion start failed");
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %request.job_id, error = %e, "Conversion enqueue failed");
            }
        }
    }
}
