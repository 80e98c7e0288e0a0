//! Transcode decision seam
//!
//! Prepping pauses on video files routed to PICTURE until a decider answers.

use crate::models::TranscodeDecision;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

#[async_trait]
pub trait TranscodeDecider: Send + Sync {
    /// Decide for the videos of one run; `files` are bare file names
    async fn decide(&self, job_id: Uuid, files: &[String]) -> TranscodeDecision;
}

/// Always answers the same way
pub struct FixedTranscodeDecision(pub TranscodeDecision);

#[async_trait]
impl TranscodeDecider for FixedTranscodeDecision {
    async fn decide(&self, _job_id: Uuid, _files: &[String]) -> TranscodeDecision {
        self.0.clone()
    }
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<TranscodeDecision>>>>;

/// Decisions delivered from outside (the HTTP API) through oneshot channels
#[derive(Clone, Default)]
pub struct ChannelTranscodeDecider {
    pending: PendingMap,
}

/// Removes the waiting slot if the run stops waiting (e.g. cancelled)
struct PendingSlot {
    pending: PendingMap,
    job_id: Uuid,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

impl ChannelTranscodeDecider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a decision; `false` when the job is not waiting
    pub fn answer(&self, job_id: Uuid, decision: TranscodeDecision) -> bool {
        let sender = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
        match sender {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    pub fn is_waiting(&self, job_id: Uuid) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&job_id)
    }
}

#[async_trait]
impl TranscodeDecider for ChannelTranscodeDecider {
    async fn decide(&self, job_id: Uuid, files: &[String]) -> TranscodeDecision {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, tx);
        let _slot = PendingSlot {
            pending: self.pending.clone(),
            job_id,
        };
        debug!(job_id = %job_id, files = files.len(), "Waiting for transcode decision");

        match rx.await {
            Ok(decision) => decision,
            Err(_) => {
                warn!(job_id = %job_id, "Transcode decision channel closed, declining");
                TranscodeDecision::Decline
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TranscodeOptions;

    #[tokio::test]
    async fn answer_reaches_waiting_run() {
        let decider = ChannelTranscodeDecider::new();
        let job_id = Uuid::new_v4();
        assert!(!decider.answer(job_id, TranscodeDecision::Decline));

        let waiting = tokio::spawn({
            let decider = decider.clone();
            async move { decider.decide(job_id, &["cut.mov".to_string()]).await }
        });
        while !decider.is_waiting(job_id) {
            tokio::task::yield_now().await;
        }

        let accept = TranscodeDecision::Accept(TranscodeOptions::default());
        assert!(decider.answer(job_id, accept.clone()));
        assert_eq!(waiting.await.unwrap(), accept);
        assert!(!decider.is_waiting(job_id));
    }

    #[tokio::test]
    async fn abandoned_wait_clears_slot() {
        let decider = ChannelTranscodeDecider::new();
        let job_id = Uuid::new_v4();
        let waiting = tokio::spawn({
            let decider = decider.clone();
            async move { decider.decide(job_id, &[]).await }
        });
        while !decider.is_waiting(job_id) {
            tokio::task::yield_now().await;
        }

        waiting.abort();
        let _ = waiting.await;
        assert!(!decider.is_waiting(job_id));
    }
}
