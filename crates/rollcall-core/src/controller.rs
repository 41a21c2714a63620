//! Single entry point for the application layer.
//!
//! The controller owns one broadcaster and one collector sharing a radio and
//! an event sink, and enforces that at most one of them runs at a time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::broadcaster::BroadcasterRole;
use crate::collector::CollectorRole;
use crate::config::BeaconConfig;
use crate::error::{Result, RollcallError};
use crate::events::{EventSink, RoleEvent};
use crate::proximity::ProximityFilter;
use crate::radio::RadioPort;
use crate::types::{BroadcasterState, CollectorState, Identity, RoleKind, SubjectTag};

/// Broadcaster part of a [`ControllerStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BroadcasterStatus {
    /// Lifecycle state.
    pub state: BroadcasterState,
    /// Identity of the current or most recent run.
    pub identity: Option<Identity>,
}

/// Collector part of a [`ControllerStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CollectorStatus {
    /// Lifecycle state.
    pub state: CollectorState,
    /// Subject of the current or most recent session.
    pub subject: Option<SubjectTag>,
    /// Identities discovered this session, in discovery order.
    pub detected: Vec<Identity>,
    /// Identities acknowledged this session, in discovery order.
    pub acknowledged: Vec<Identity>,
}

/// Snapshot of both roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ControllerStatus {
    /// The role currently running, if any.
    pub active_role: Option<RoleKind>,
    /// When the most recent role was started.
    pub started_at_utc: Option<DateTime<Utc>>,
    /// Broadcaster details.
    pub broadcaster: BroadcasterStatus,
    /// Collector details.
    pub collector: CollectorStatus,
}

/// Owns both roles and admits one at a time.
pub struct BeaconController {
    radio: Arc<dyn RadioPort>,
    events: Arc<dyn EventSink>,
    broadcaster: BroadcasterRole,
    collector: CollectorRole,
    mode: Option<RoleKind>,
    started_at: Option<DateTime<Utc>>,
}

impl BeaconController {
    /// Create a controller with both roles idle.
    pub fn new(radio: Arc<dyn RadioPort>, events: Arc<dyn EventSink>, config: &BeaconConfig) -> Self {
        let filter = ProximityFilter::new(config.proximity);
        Self {
            broadcaster: BroadcasterRole::new(
                radio.clone(),
                events.clone(),
                config.broadcaster.clone(),
                filter,
            ),
            collector: CollectorRole::new(
                radio.clone(),
                events.clone(),
                config.collector.clone(),
                filter,
            ),
            radio,
            events,
            mode: None,
            started_at: None,
        }
    }

    /// The role that is actually running. A broadcaster that stopped itself
    /// after an acknowledgment no longer counts.
    #[must_use]
    pub fn active_role(&self) -> Option<RoleKind> {
        if self.broadcaster.is_running() {
            Some(RoleKind::Broadcaster)
        } else if self.collector.is_running() {
            Some(RoleKind::Collector)
        } else {
            None
        }
    }

    /// Whether the radio is present and powered.
    pub async fn radio_enabled(&self) -> bool {
        self.radio.is_radio_enabled().await
    }

    /// Start the broadcaster.
    ///
    /// # Errors
    ///
    /// [`RollcallError::AlreadyRunning`] if either role runs, otherwise any
    /// error from [`BroadcasterRole::start`].
    pub async fn start_broadcaster(&mut self, identity: Identity) -> Result<()> {
        self.admit()?;
        self.broadcaster.start(identity).await?;
        self.mark_started(RoleKind::Broadcaster);
        Ok(())
    }

    /// Start the collector.
    ///
    /// # Errors
    ///
    /// [`RollcallError::AlreadyRunning`] if either role runs, otherwise any
    /// error from [`CollectorRole::start`].
    pub async fn start_collector(&mut self, subject: SubjectTag) -> Result<()> {
        self.admit()?;
        self.collector.start(subject).await?;
        self.mark_started(RoleKind::Collector);
        Ok(())
    }

    fn admit(&self) -> Result<()> {
        match self.active_role() {
            Some(active) => Err(RollcallError::AlreadyRunning { active }),
            None => Ok(()),
        }
    }

    fn mark_started(&mut self, kind: RoleKind) {
        info!(role = %kind, "Role started");
        self.mode = Some(kind);
        self.started_at = Some(Utc::now());
    }

    /// Stop whichever role was started last. Idempotent.
    pub async fn stop(&mut self) {
        match self.mode.take() {
            Some(RoleKind::Broadcaster) => self.broadcaster.stop().await,
            Some(RoleKind::Collector) => self.collector.stop().await,
            None => {}
        }
        info!("All BLE operations stopped");
        self.events
            .emit(RoleEvent::status("All BLE operations stopped"));
    }

    /// Snapshot both roles.
    #[must_use]
    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            active_role: self.active_role(),
            started_at_utc: self.started_at,
            broadcaster: BroadcasterStatus {
                state: self.broadcaster.state(),
                identity: self.broadcaster.identity().cloned(),
            },
            collector: CollectorStatus {
                state: self.collector.state(),
                subject: self.collector.subject().cloned(),
                detected: self.collector.detected(),
                acknowledged: self.collector.acknowledged(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRadio;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup() -> (
        BeaconController,
        MockRadio,
        mpsc::UnboundedReceiver<RoleEvent>,
    ) {
        let radio = MockRadio::new();
        let (tx, rx) = mpsc::unbounded_channel::<RoleEvent>();
        let controller =
            BeaconController::new(Arc::new(radio.clone()), Arc::new(tx), &BeaconConfig::default());
        (controller, radio, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_role_at_a_time() {
        let (mut controller, _radio, _rx) = setup();
        controller
            .start_collector(SubjectTag::new("105"))
            .await
            .unwrap();
        assert_eq!(controller.active_role(), Some(RoleKind::Collector));

        let err = controller
            .start_broadcaster(Identity::new("42"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RollcallError::AlreadyRunning {
                active: RoleKind::Collector
            }
        ));

        controller.stop().await;
        assert_eq!(controller.active_role(), None);
        controller
            .start_broadcaster(Identity::new("42"))
            .await
            .unwrap();
        assert_eq!(controller.active_role(), Some(RoleKind::Broadcaster));
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_broadcaster_frees_the_radio() {
        let (mut controller, radio, _rx) = setup();
        controller
            .start_broadcaster(Identity::new("42"))
            .await
            .unwrap();

        radio.inject_name("AC:42:105:Z", -60);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(controller.active_role(), None);
        controller
            .start_collector(SubjectTag::new("105"))
            .await
            .unwrap();
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_and_is_idempotent() {
        let (mut controller, _radio, mut rx) = setup();
        controller.stop().await;
        controller
            .start_collector(SubjectTag::new("105"))
            .await
            .unwrap();
        controller.stop().await;
        controller.stop().await;

        let mut stops = 0;
        while let Ok(event) = rx.try_recv() {
            if event == RoleEvent::status("All BLE operations stopped") {
                stops += 1;
            }
        }
        assert_eq!(stops, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_snapshot() {
        let (mut controller, radio, _rx) = setup();
        let status = controller.status();
        assert_eq!(status.active_role, None);
        assert_eq!(status.started_at_utc, None);
        assert_eq!(status.collector.state, CollectorState::Idle);

        controller
            .start_collector(SubjectTag::new("105"))
            .await
            .unwrap();
        radio.inject_name("AB:42:Z", -60);
        radio.inject_name("AB:43:Z", -60);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let status = controller.status();
        assert_eq!(status.active_role, Some(RoleKind::Collector));
        assert!(status.started_at_utc.is_some());
        assert_eq!(status.collector.subject, Some(SubjectTag::new("105")));
        assert_eq!(
            status.collector.detected,
            vec![Identity::new("42"), Identity::new("43")]
        );
        assert_eq!(status.collector.acknowledged, status.collector.detected);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["active_role"], "collector");
        assert_eq!(json["collector"]["state"], "scanning");
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_leaves_nothing_running() {
        let (mut controller, radio, _rx) = setup();
        radio.set_enabled(false);
        assert!(matches!(
            controller.start_broadcaster(Identity::new("42")).await,
            Err(RollcallError::RadioUnavailable)
        ));
        assert_eq!(controller.active_role(), None);
        assert!(!controller.radio_enabled().await);
    }
}
