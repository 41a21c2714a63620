//! Outbound events reported by the roles.
//!
//! Every event is a named signal with a string payload. The names are the
//! ones the surrounding application listens for.

use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::proximity::ProximityReading;
use crate::types::{Identity, SubjectTag};

/// An event emitted by a role or the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum RoleEvent {
    /// Lifecycle and progress notices.
    Status(String),
    /// A failure that did not stop the role.
    Error(String),
    /// The collector found a new identity.
    StudentDetected(Identity),
    /// The collector put an acknowledgment batch on the air.
    AckBroadcastProgress(String),
    /// The broadcaster was acknowledged for this subject.
    AckReceived(SubjectTag),
    /// Signal strength of a recognized frame.
    RssiInfo(ProximityReading),
}

impl RoleEvent {
    /// Build a status event.
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status(message.into())
    }

    /// Build an error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Signal name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Error(_) => "error",
            Self::StudentDetected(_) => "studentDetected",
            Self::AckBroadcastProgress(_) => "ackBroadcastProgress",
            Self::AckReceived(_) => "ackReceived",
            Self::RssiInfo(_) => "rssiInfo",
        }
    }

    /// Payload string.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Status(message) | Self::Error(message) | Self::AckBroadcastProgress(message) => {
                message.clone()
            }
            Self::StudentDetected(identity) => identity.to_string(),
            Self::AckReceived(subject) => subject.to_string(),
            Self::RssiInfo(reading) => format!(
                "RSSI: {} dBm (~{:.1} m)",
                reading.rssi, reading.distance_meters
            ),
        }
    }

    /// Whether this is an error event.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Destination for [`RoleEvent`]s.
///
/// `emit` must not block: roles call it from their task loop.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Delivery failures are dropped.
    fn emit(&self, event: RoleEvent);
}

impl EventSink for mpsc::UnboundedSender<RoleEvent> {
    fn emit(&self, event: RoleEvent) {
        if let Err(err) = self.send(event) {
            trace!(event = err.0.name(), "Event receiver dropped");
        }
    }
}

impl EventSink for broadcast::Sender<RoleEvent> {
    fn emit(&self, event: RoleEvent) {
        if let Err(err) = self.send(event) {
            trace!(event = err.0.name(), "No event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(RoleEvent::status("x").name(), "status");
        assert_eq!(RoleEvent::error("x").name(), "error");
        assert_eq!(
            RoleEvent::StudentDetected(Identity::new("42")).name(),
            "studentDetected"
        );
        assert_eq!(
            RoleEvent::AckBroadcastProgress("x".into()).name(),
            "ackBroadcastProgress"
        );
        assert_eq!(
            RoleEvent::AckReceived(SubjectTag::new("105")).name(),
            "ackReceived"
        );
    }

    #[test]
    fn test_payloads() {
        assert_eq!(RoleEvent::StudentDetected(Identity::new("42")).message(), "42");
        assert_eq!(RoleEvent::AckReceived(SubjectTag::new("105")).message(), "105");

        let reading = ProximityReading {
            rssi: -60,
            distance_meters: 1.122,
            accepted: true,
        };
        assert_eq!(
            RoleEvent::RssiInfo(reading).message(),
            "RSSI: -60 dBm (~1.1 m)"
        );
    }

    #[test]
    fn test_mpsc_sink_delivers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(RoleEvent::status("hello"));
        assert_eq!(rx.try_recv().unwrap(), RoleEvent::status("hello"));
    }

    #[test]
    fn test_sinks_tolerate_missing_receivers() {
        let (tx, rx) = mpsc::unbounded_channel::<RoleEvent>();
        drop(rx);
        tx.emit(RoleEvent::status("dropped"));

        let (tx, _) = broadcast::channel::<RoleEvent>(4);
        tx.emit(RoleEvent::status("dropped"));
    }
}
