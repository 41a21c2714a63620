//! Bounded in-memory log of recent role events.
//!
//! The core publishes [`RoleEvent`]s on a broadcast channel; [`spawn_pump`]
//! copies each one into the [`EventLog`] and into the tracing output so the
//! HTTP surface can serve the most recent history.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollcall_core::RoleEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::logging::ROLE_EVENT_TARGET;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "01928f7e-3c4a-7b21-9d4e-5f6a7b8c9d0e",
    "recorded_at_utc": "2025-01-15T09:30:00Z",
    "event": "studentDetected",
    "message": "42"
}))]
pub struct LoggedEvent {
    /// Time-ordered identifier (UUID v7).
    pub id: Uuid,

    /// When the server received the event.
    pub recorded_at_utc: DateTime<Utc>,

    /// Signal name, e.g. `status`, `studentDetected`, `ackReceived`.
    #[schema(example = "studentDetected")]
    pub event: String,

    /// Event payload.
    #[schema(example = "42")]
    pub message: String,
}

impl LoggedEvent {
    fn from_event(event: &RoleEvent) -> Self {
        Self {
            id: Uuid::now_v7(),
            recorded_at_utc: Utc::now(),
            event: event.name().to_string(),
            message: event.message(),
        }
    }
}

/// Ring buffer of the most recent events, oldest first.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    entries: RwLock<VecDeque<LoggedEvent>>,
}

impl EventLog {
    /// Create a log keeping at most `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Maximum number of retained events.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an event, evicting the oldest when full.
    pub async fn record(&self, event: &RoleEvent) {
        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LoggedEvent::from_event(event));
    }

    /// The newest `limit` events, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<LoggedEvent> {
        let entries = self.entries.read().await;
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained events.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing has been recorded yet.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Copy events from `rx` into `log` until every sender is gone.
pub fn spawn_pump(log: Arc<EventLog>, mut rx: broadcast::Receiver<RoleEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.is_error() {
                        warn!(
                            target: ROLE_EVENT_TARGET,
                            event = event.name(),
                            message = %event.message(),
                            "Role event"
                        );
                    } else {
                        info!(
                            target: ROLE_EVENT_TARGET,
                            event = event.name(),
                            message = %event.message(),
                            "Role event"
                        );
                    }
                    log.record(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event log fell behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event channel closed");
                    break;
                }
            }
        }
    })
}
