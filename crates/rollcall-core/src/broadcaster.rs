//! Student side of the exchange.
//!
//! The broadcaster advertises `AB:<identity>:Z`, restarts the advertisement
//! on a fixed interval so stacks that silently drop long-running adverts keep
//! it on the air, and scans for an `AC` frame naming its identity. Once
//! acknowledged it reports the subject and shuts itself down.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, Instrument};

use crate::codec::{self, BeaconFrame};
use crate::config::BroadcasterConfig;
use crate::error::{Result, RollcallError};
use crate::events::{EventSink, RoleEvent};
use crate::proximity::ProximityFilter;
use crate::radio::{RadioPort, ScanEvent, ScanStream};
use crate::role::{self, release_radio, report_radio_error, RoleRun};
use crate::types::{BroadcasterState, Identity, RoleKind, ScanObservation, SubjectTag};

/// The broadcaster role.
pub struct BroadcasterRole {
    radio: Arc<dyn RadioPort>,
    events: Arc<dyn EventSink>,
    config: BroadcasterConfig,
    filter: ProximityFilter,
    state: Arc<watch::Sender<BroadcasterState>>,
    identity: Option<Identity>,
    run: Option<RoleRun>,
}

impl BroadcasterRole {
    /// Create an idle broadcaster.
    pub fn new(
        radio: Arc<dyn RadioPort>,
        events: Arc<dyn EventSink>,
        config: BroadcasterConfig,
        filter: ProximityFilter,
    ) -> Self {
        let (state, _) = watch::channel(BroadcasterState::Idle);
        Self {
            radio,
            events,
            config,
            filter,
            state: Arc::new(state),
            identity: None,
            run: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BroadcasterState {
        *self.state.borrow()
    }

    /// Watch state changes, including the self-stop after acknowledgment.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<BroadcasterState> {
        self.state.subscribe()
    }

    /// Identity of the current or most recent run.
    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Whether the role is advertising.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == BroadcasterState::Advertising
    }

    /// Start advertising `identity` and listening for its acknowledgment.
    ///
    /// Advertise and scan failures at start are reported as error events and
    /// retried by the refresh loop; they do not fail the call.
    ///
    /// # Errors
    ///
    /// - [`RollcallError::AlreadyRunning`] while advertising
    /// - [`RollcallError::RadioUnavailable`] if the radio is off
    /// - [`RollcallError::Encoding`] if the identity cannot be framed
    pub async fn start(&mut self, identity: Identity) -> Result<()> {
        if self.is_running() {
            return Err(RollcallError::AlreadyRunning {
                active: RoleKind::Broadcaster,
            });
        }
        if !self.radio.is_radio_enabled().await {
            self.events
                .emit(RoleEvent::error("Bluetooth unavailable or disabled"));
            return Err(RollcallError::RadioUnavailable);
        }
        let frame = codec::encode_broadcast(&identity)?;

        // Reap a run that ended on its own after an acknowledgment.
        if let Some(previous) = self.run.take() {
            previous.shutdown().await;
        }

        let span = role::run_span(RoleKind::Broadcaster);
        let scan = self.open_radio(&frame).instrument(span.clone()).await;

        self.identity = Some(identity.clone());
        self.state.send_replace(BroadcasterState::Advertising);
        span.in_scope(|| info!(identity = %identity, frame = %frame, "Broadcaster started"));
        self.events
            .emit(RoleEvent::status(format!("Student mode started: {frame}")));

        let task = BroadcastTask {
            radio: self.radio.clone(),
            events: self.events.clone(),
            filter: self.filter,
            state: self.state.clone(),
            on_air: Identity::new(codec::sanitize_token(identity.as_str())),
            frame,
            scan,
        };
        let interval = self.config.refresh_interval();
        self.run = Some(RoleRun::spawn(span, move |cancel| {
            task.run(cancel, interval)
        }));
        Ok(())
    }

    async fn open_radio(&self, frame: &str) -> Option<ScanStream> {
        if let Err(err) = self.radio.set_local_name(frame).await {
            report_radio_error(self.events.as_ref(), "Set name failed", &err);
        }
        match self.radio.start_advertising(frame, None).await {
            Ok(()) => self
                .events
                .emit(RoleEvent::status(format!("Advertising as {frame}"))),
            Err(err) => report_radio_error(self.events.as_ref(), "Advertise failed", &err),
        }
        match self.radio.start_scanning().await {
            Ok(stream) => Some(stream),
            Err(err) => {
                report_radio_error(self.events.as_ref(), "Scan failed", &err);
                None
            }
        }
    }

    /// Stop advertising and scanning. Safe to call in any state, any number
    /// of times.
    pub async fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            run.shutdown().await;
        }
        release_radio(self.radio.as_ref()).await;
        self.state.send_replace(BroadcasterState::Stopped);
        info!("Broadcaster stopped");
        self.events.emit(RoleEvent::status("Student mode stopped"));
    }
}

struct BroadcastTask {
    radio: Arc<dyn RadioPort>,
    events: Arc<dyn EventSink>,
    filter: ProximityFilter,
    state: Arc<watch::Sender<BroadcasterState>>,
    /// Identity as carried in frames, after sanitization.
    on_air: Identity,
    frame: String,
    scan: Option<ScanStream>,
}

impl BroadcastTask {
    async fn run(mut self, cancel: CancellationToken, interval: time::Duration) {
        let mut refresh = time::interval_at(Instant::now() + interval, interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = refresh.tick() => self.refresh().await,
                event = role::next_scan_event(&mut self.scan) => match event {
                    Some(ScanEvent::Observation(observation)) => {
                        if let Some(subject) = self.acknowledgment_in(&observation) {
                            self.finish(subject).await;
                            return;
                        }
                    }
                    Some(ScanEvent::Failed { code }) => {
                        self.events.emit(RoleEvent::error(format!("Scan failed: {code}")));
                        self.scan = None;
                    }
                    None => {
                        debug!("Scan stream closed, restarting on next refresh");
                        self.scan = None;
                    }
                },
            }
        }
        debug!("Broadcaster task cancelled");
    }

    /// Stop and restart the advertisement, and revive a dead scan.
    async fn refresh(&mut self) {
        trace!(frame = %self.frame, "Refreshing advertisement");
        if let Err(err) = self.radio.stop_advertising().await {
            debug!(error = %err, "Ignoring stop advertising failure during refresh");
        }
        if let Err(err) = self.radio.start_advertising(&self.frame, None).await {
            report_radio_error(self.events.as_ref(), "Advertise failed", &err);
        }

        if self.scan.is_none() {
            match self.radio.start_scanning().await {
                Ok(stream) => {
                    debug!("Scan restarted");
                    self.scan = Some(stream);
                }
                Err(err) => report_radio_error(self.events.as_ref(), "Scan failed", &err),
            }
        }
    }

    /// The subject of an acknowledgment addressed to us, if `observation` is one.
    fn acknowledgment_in(&self, observation: &ScanObservation) -> Option<SubjectTag> {
        let frame = codec::decode(&observation.raw_name)?;

        let reading = self.filter.evaluate(observation.signal_strength);
        self.events.emit(RoleEvent::RssiInfo(reading));
        if !reading.accepted {
            trace!(rssi = reading.rssi, "Ignoring distant frame");
            return None;
        }

        match frame {
            BeaconFrame::Ack {
                identities,
                subject,
            } if identities.contains(&self.on_air) => Some(subject),
            _ => None,
        }
    }

    async fn finish(self, subject: SubjectTag) {
        info!(identity = %self.on_air, subject = %subject, "Acknowledgment received");
        self.events.emit(RoleEvent::AckReceived(subject));

        drop(self.scan);
        release_radio(self.radio.as_ref()).await;
        self.state.send_replace(BroadcasterState::Stopped);
        self.events.emit(RoleEvent::status("Student mode stopped"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRadio, RadioCall};
    use crate::proximity::ProximityConfig;
    use crate::radio::RadioOperation;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup() -> (
        BroadcasterRole,
        MockRadio,
        mpsc::UnboundedReceiver<RoleEvent>,
    ) {
        let radio = MockRadio::new();
        let (tx, rx) = mpsc::unbounded_channel::<RoleEvent>();
        let role = BroadcasterRole::new(
            Arc::new(radio.clone()),
            Arc::new(tx),
            BroadcasterConfig::default(),
            ProximityFilter::new(ProximityConfig::default()),
        );
        (role, radio, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RoleEvent>) -> Vec<RoleEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_advertises_and_scans() {
        let (mut role, radio, mut rx) = setup();
        role.start(Identity::new("42")).await.unwrap();

        assert_eq!(role.state(), BroadcasterState::Advertising);
        assert_eq!(radio.local_name().as_deref(), Some("AB:42:Z"));
        assert_eq!(radio.current_advertisement().as_deref(), Some("AB:42:Z"));
        assert!(radio.is_scanning());

        let events = drain(&mut rx);
        assert!(events.contains(&RoleEvent::status("Student mode started: AB:42:Z")));
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected() {
        let (mut role, _radio, _rx) = setup();
        role.start(Identity::new("42")).await.unwrap();

        let err = role.start(Identity::new("43")).await.unwrap_err();
        assert!(matches!(
            err,
            RollcallError::AlreadyRunning {
                active: RoleKind::Broadcaster
            }
        ));
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_radio_rejected() {
        let (mut role, radio, mut rx) = setup();
        radio.set_enabled(false);

        let err = role.start(Identity::new("42")).await.unwrap_err();
        assert!(matches!(err, RollcallError::RadioUnavailable));
        assert_eq!(role.state(), BroadcasterState::Idle);
        assert!(drain(&mut rx).iter().any(RoleEvent::is_error));
        assert!(radio.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_identity_rejected() {
        let (mut role, radio, _rx) = setup();
        let err = role
            .start(Identity::new("x".repeat(codec::MAX_IDENTITY_LEN + 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, RollcallError::Encoding(_)));
        assert!(radio.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_restarts_advertisement() {
        let (mut role, radio, _rx) = setup();
        role.start(Identity::new("42")).await.unwrap();
        radio.clear_calls();

        time::sleep(Duration::from_millis(4_100)).await;

        let restarts = radio
            .calls()
            .iter()
            .filter(|call| matches!(call, RadioCall::StartAdvertising { .. }))
            .count();
        assert_eq!(restarts, 2);
        assert!(radio.calls().contains(&RadioCall::StopAdvertising));
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledgment_stops_role() {
        let (mut role, radio, mut rx) = setup();
        role.start(Identity::new("42")).await.unwrap();
        let mut state = role.subscribe_state();

        radio.inject_name("AC:41,42:105:Z", -60);
        state
            .wait_for(|s| *s == BroadcasterState::Stopped)
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(events.contains(&RoleEvent::AckReceived(SubjectTag::new("105"))));
        assert!(events.contains(&RoleEvent::status("Student mode stopped")));
        assert!(!radio.is_advertising());
        assert!(!radio.is_scanning());
        assert!(!role.is_running());

        // A self-stopped role can start again.
        role.start(Identity::new("42")).await.unwrap();
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_frames_for_others_and_far_away() {
        let (mut role, radio, mut rx) = setup();
        role.start(Identity::new("42")).await.unwrap();

        radio.inject_name("AC:41,43:105:Z", -60);
        radio.inject_name("AC:42:105:Z", -90);
        radio.inject_name("MyHeadphones", -40);
        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(role.state(), BroadcasterState::Advertising);
        let events = drain(&mut rx);
        assert!(!events
            .iter()
            .any(|e| matches!(e, RoleEvent::AckReceived(_))));
        let rssi_events = events
            .iter()
            .filter(|e| matches!(e, RoleEvent::RssiInfo(_)))
            .count();
        assert_eq!(rssi_events, 2);
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failures_are_non_fatal() {
        let (mut role, radio, mut rx) = setup();
        radio.fail_operation(RadioOperation::StartAdvertising, 3);
        radio.fail_operation(RadioOperation::StartScanning, 2);

        role.start(Identity::new("42")).await.unwrap();
        assert_eq!(role.state(), BroadcasterState::Advertising);
        assert_eq!(drain(&mut rx).iter().filter(|e| e.is_error()).count(), 2);

        radio.clear_failure(RadioOperation::StartAdvertising);
        radio.clear_failure(RadioOperation::StartScanning);
        time::sleep(Duration::from_millis(2_100)).await;

        assert!(radio.is_advertising());
        assert!(radio.is_scanning());
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (mut role, radio, mut rx) = setup();
        role.stop().await;
        role.start(Identity::new("42")).await.unwrap();
        role.stop().await;
        role.stop().await;

        assert_eq!(role.state(), BroadcasterState::Stopped);
        assert!(!radio.is_advertising());
        assert!(!radio.is_scanning());

        // No radio traffic after stop returns.
        radio.clear_calls();
        time::sleep(Duration::from_secs(10)).await;
        assert!(radio.calls().is_empty());

        let stops = drain(&mut rx)
            .into_iter()
            .filter(|e| *e == RoleEvent::status("Student mode stopped"))
            .count();
        assert_eq!(stops, 3);
    }
}
