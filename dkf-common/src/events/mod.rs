//! Event types for the docketflow event system
//!
//! Provides shared event definitions and the EventBus used to publish job and
//! index state changes to observers (SSE clients, the coordinator, tests).

mod job_types;

pub use job_types::{CompletionState, JobMode, JobPhase, SearchDomain};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Docketflow event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeliveryEvent {
    /// Delivery job accepted and started
    JobStarted {
        job_id: Uuid,
        docket: String,
        mode: JobMode,
        /// Flattened file count across all staged entries
        total_files: usize,
        timestamp: DateTime<Utc>,
    },

    /// Job moved to a new phase
    JobPhaseChanged {
        job_id: Uuid,
        old_phase: JobPhase,
        new_phase: JobPhase,
        timestamp: DateTime<Utc>,
    },

    /// Aggregate progress update
    ///
    /// `progress` advances one step per file; `fine_progress` is interpolated
    /// by bytes written inside a single copy. Both are non-decreasing.
    JobProgress {
        job_id: Uuid,
        progress: f64,
        fine_progress: f64,
        #[serde(default)]
        current_file: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A staged entry advanced its completion state
    EntryStateChanged {
        job_id: Uuid,
        entry_id: Uuid,
        entry_progress: f64,
        state: CompletionState,
        timestamp: DateTime<Utc>,
    },

    /// Video files found during prep; the job waits for a transcode decision
    TranscodeDecisionRequested {
        job_id: Uuid,
        files: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Job finished (possibly with per-file errors)
    JobCompleted {
        job_id: Uuid,
        files_copied: usize,
        files_skipped: usize,
        failed_files: Vec<String>,
        duration_seconds: u64,
        timestamp: DateTime<Utc>,
    },

    /// Job cancelled by user
    JobCancelled {
        job_id: Uuid,
        files_copied: usize,
        timestamp: DateTime<Utc>,
    },

    /// Job aborted by a fatal error
    JobFailed {
        job_id: Uuid,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// Prep summary file (re)written
    SummaryWritten {
        docket: String,
        summary_path: String,
        timestamp: DateTime<Utc>,
    },

    /// Search index for a domain built
    IndexBuilt {
        domain: SearchDomain,
        item_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Cached search indexes dropped
    IndexInvalidated {
        domains: Vec<SearchDomain>,
        timestamp: DateTime<Utc>,
    },
}

impl DeliveryEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            DeliveryEvent::JobStarted { .. } => "JobStarted",
            DeliveryEvent::JobPhaseChanged { .. } => "JobPhaseChanged",
            DeliveryEvent::JobProgress { .. } => "JobProgress",
            DeliveryEvent::EntryStateChanged { .. } => "EntryStateChanged",
            DeliveryEvent::TranscodeDecisionRequested { .. } => "TranscodeDecisionRequested",
            DeliveryEvent::JobCompleted { .. } => "JobCompleted",
            DeliveryEvent::JobCancelled { .. } => "JobCancelled",
            DeliveryEvent::JobFailed { .. } => "JobFailed",
            DeliveryEvent::SummaryWritten { .. } => "SummaryWritten",
            DeliveryEvent::IndexBuilt { .. } => "IndexBuilt",
            DeliveryEvent::IndexInvalidated { .. } => "IndexInvalidated",
        }
    }

    /// Job this event belongs to, if any
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            DeliveryEvent::JobStarted { job_id, .. }
            | DeliveryEvent::JobPhaseChanged { job_id, .. }
            | DeliveryEvent::JobProgress { job_id, .. }
            | DeliveryEvent::EntryStateChanged { job_id, .. }
            | DeliveryEvent::TranscodeDecisionRequested { job_id, .. }
            | DeliveryEvent::JobCompleted { job_id, .. }
            | DeliveryEvent::JobCancelled { job_id, .. }
            | DeliveryEvent::JobFailed { job_id, .. } => Some(*job_id),
            DeliveryEvent::SummaryWritten { .. }
            | DeliveryEvent::IndexBuilt { .. }
            | DeliveryEvent::IndexInvalidated { .. } => None,
        }
    }
}

/// Broadcast bus for [`DeliveryEvent`]s
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DeliveryEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    ///
    /// # Examples
    ///
    /// ```
    /// use dkf_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: DeliveryEvent,
    ) -> Result<usize, broadcast::error::SendError<DeliveryEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DeliveryEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();

        bus.emit(DeliveryEvent::JobCancelled {
            job_id,
            files_copied: 2,
            timestamp: Utc::now(),
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "JobCancelled");
        assert_eq!(event.job_id(), Some(job_id));
    }

    #[test]
    fn emit_without_subscribers_errors_but_lossy_does_not() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        let event = DeliveryEvent::IndexInvalidated {
            domains: vec![SearchDomain::Sessions],
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = DeliveryEvent::IndexBuilt {
            domain: SearchDomain::WorkPicture,
            item_count: 12,
            timestamp: Utc::now(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "IndexBuilt");
        assert_eq!(json["domain"], "work_picture");
        assert_eq!(json["item_count"], 12);
        assert!(event.job_id().is_none());
    }
}
