//! Server-Sent Events (SSE) for job and index events

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use dkf_common::events::DeliveryEvent;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// GET /events query string
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Only events of this job (index and summary events always pass)
    #[serde(default)]
    pub job_id: Option<Uuid>,
}

impl EventFilter {
    fn accepts(&self, event: &DeliveryEvent) -> bool {
        match (self.job_id, event.job_id()) {
            (Some(wanted), Some(job_id)) => wanted == job_id,
            _ => true,
        }
    }
}

/// GET /events - SSE event stream
///
/// Streams every [`DeliveryEvent`], named by its type. Slow clients skip
/// events they fell behind on rather than stalling publishers.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(job_id = ?filter.job_id, "New SSE client connected");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !filter.accepts(&event) {
                        continue;
                    }
                    let event_type = event.event_type().to_string();
                    match serde_json::to_string(&event) {
                        Ok(event_json) => {
                            debug!("SSE: Broadcasting event: {}", event_type);
                            yield Ok(Event::default().event(event_type).data(event_json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE: Client lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

/// Build event stream routes
pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
