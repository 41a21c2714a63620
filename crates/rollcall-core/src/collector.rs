//! Teacher side of the exchange.
//!
//! The collector scans for `AB` frames, records each new identity once, and
//! acknowledges identities in batches by briefly advertising `AC` frames.
//!
//! One task owns the scan stream. Acknowledgment runs as a child job so that
//! discovery keeps flowing while a batch is on the air; at most one job exists
//! at a time. Identities discovered while a job runs are picked up by a
//! follow-up job as soon as it finishes. Identities left unacknowledged by a
//! failed batch are retried on the next retry tick.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};

use crate::codec::{self, BeaconFrame};
use crate::config::CollectorConfig;
use crate::error::{Result, RollcallError};
use crate::events::{EventSink, RoleEvent};
use crate::proximity::ProximityFilter;
use crate::radio::{RadioPort, ScanEvent, ScanStream};
use crate::role::{self, release_radio, report_radio_error, sleep_or_cancel, RoleRun};
use crate::types::{CollectorState, Identity, RoleKind, ScanObservation, SubjectTag};

/// Discovered and acknowledged identities for one collection session.
///
/// `acked` and `unfit` are disjoint subsets of `detected`.
#[derive(Debug, Default)]
pub struct AckLedger {
    detected: Vec<Identity>,
    detected_set: HashSet<Identity>,
    acked: HashSet<Identity>,
    /// Too long to fit any frame for this session's subject.
    unfit: HashSet<Identity>,
    last_name: Option<String>,
}

impl AckLedger {
    /// Record a discovery. Returns `true` the first time an identity is seen.
    pub fn record(&mut self, identity: Identity) -> bool {
        if self.detected_set.insert(identity.clone()) {
            self.detected.push(identity);
            true
        } else {
            false
        }
    }

    /// Detected, not yet acknowledged, and encodable, in discovery order.
    #[must_use]
    pub fn pending(&self) -> Vec<Identity> {
        self.detected
            .iter()
            .filter(|identity| self.is_pending(identity))
            .cloned()
            .collect()
    }

    /// Whether anything is waiting for acknowledgment.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.detected.iter().any(|identity| self.is_pending(identity))
    }

    fn is_pending(&self, identity: &Identity) -> bool {
        !self.acked.contains(identity) && !self.unfit.contains(identity)
    }

    /// The members of `identities` not yet acknowledged.
    #[must_use]
    pub fn unacked_of(&self, identities: &[Identity]) -> Vec<Identity> {
        identities
            .iter()
            .filter(|identity| !self.acked.contains(*identity))
            .cloned()
            .collect()
    }

    /// Mark identities as acknowledged. Unknown identities are ignored.
    pub fn mark_acked(&mut self, identities: &[Identity]) {
        for identity in identities {
            if self.detected_set.contains(identity) {
                self.acked.insert(identity.clone());
            }
        }
    }

    /// Set aside identities no frame can carry, so they are not retried.
    /// Returns the ones not already set aside.
    pub fn mark_unfit(&mut self, identities: &[Identity]) -> Vec<Identity> {
        identities
            .iter()
            .filter(|identity| {
                self.detected_set.contains(*identity)
                    && !self.acked.contains(*identity)
                    && self.unfit.insert((*identity).clone())
            })
            .cloned()
            .collect()
    }

    /// Identities that cannot be acknowledged this session, in discovery order.
    #[must_use]
    pub fn unfit(&self) -> Vec<Identity> {
        self.detected
            .iter()
            .filter(|identity| self.unfit.contains(*identity))
            .cloned()
            .collect()
    }

    /// Every detected identity, in discovery order.
    #[must_use]
    pub fn detected(&self) -> &[Identity] {
        &self.detected
    }

    /// Acknowledged identities, in discovery order.
    #[must_use]
    pub fn acknowledged(&self) -> Vec<Identity> {
        self.detected
            .iter()
            .filter(|identity| self.acked.contains(*identity))
            .cloned()
            .collect()
    }

    fn is_current_name(&self, name: &str) -> bool {
        self.last_name.as_deref() == Some(name)
    }

    /// Forget everything, including the cached local name.
    pub fn clear(&mut self) {
        self.detected.clear();
        self.detected_set.clear();
        self.acked.clear();
        self.unfit.clear();
        self.last_name = None;
    }
}

/// The collector role.
pub struct CollectorRole {
    radio: Arc<dyn RadioPort>,
    events: Arc<dyn EventSink>,
    config: CollectorConfig,
    filter: ProximityFilter,
    state: Arc<watch::Sender<CollectorState>>,
    ledger: Arc<Mutex<AckLedger>>,
    subject: Option<SubjectTag>,
    run: Option<RoleRun>,
}

impl CollectorRole {
    /// Create an idle collector.
    pub fn new(
        radio: Arc<dyn RadioPort>,
        events: Arc<dyn EventSink>,
        config: CollectorConfig,
        filter: ProximityFilter,
    ) -> Self {
        let (state, _) = watch::channel(CollectorState::Idle);
        Self {
            radio,
            events,
            config,
            filter,
            state: Arc::new(state),
            ledger: Arc::new(Mutex::new(AckLedger::default())),
            subject: None,
            run: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CollectorState {
        *self.state.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<CollectorState> {
        self.state.subscribe()
    }

    /// Subject of the current or most recent session.
    #[must_use]
    pub const fn subject(&self) -> Option<&SubjectTag> {
        self.subject.as_ref()
    }

    /// Whether the role is scanning.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == CollectorState::Scanning
    }

    /// Identities discovered this session.
    #[must_use]
    pub fn detected(&self) -> Vec<Identity> {
        self.ledger.lock().detected().to_vec()
    }

    /// Identities acknowledged this session.
    #[must_use]
    pub fn acknowledged(&self) -> Vec<Identity> {
        self.ledger.lock().acknowledged()
    }

    /// Start collecting identities for `subject`.
    ///
    /// # Errors
    ///
    /// - [`RollcallError::AlreadyRunning`] while scanning
    /// - [`RollcallError::RadioUnavailable`] if the radio is off
    /// - [`RollcallError::Encoding`] if the subject cannot be framed
    pub async fn start(&mut self, subject: SubjectTag) -> Result<()> {
        if self.is_running() {
            return Err(RollcallError::AlreadyRunning {
                active: RoleKind::Collector,
            });
        }
        if !self.radio.is_radio_enabled().await {
            self.events
                .emit(RoleEvent::error("Bluetooth unavailable or disabled"));
            return Err(RollcallError::RadioUnavailable);
        }
        codec::subject_token(&subject)?;

        if let Some(previous) = self.run.take() {
            previous.shutdown().await;
        }
        self.ledger.lock().clear();

        let span = role::run_span(RoleKind::Collector);
        let scan = match self.radio.start_scanning().instrument(span.clone()).await {
            Ok(stream) => Some(stream),
            Err(err) => {
                span.in_scope(|| report_radio_error(self.events.as_ref(), "Scan failed", &err));
                None
            }
        };

        self.subject = Some(subject.clone());
        self.state.send_replace(CollectorState::Scanning);
        span.in_scope(|| info!(subject = %subject, "Collector started"));
        self.events.emit(RoleEvent::status("Teacher mode started"));

        let task = CollectTask {
            radio: self.radio.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
            filter: self.filter,
            subject,
            ledger: self.ledger.clone(),
            scan,
            job: None,
            rerun: false,
        };
        self.run = Some(RoleRun::spawn(span, move |cancel| task.run(cancel)));
        Ok(())
    }

    /// Stop scanning, abandon any batch in flight, and clear the session.
    /// Safe to call in any state, any number of times.
    pub async fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            run.shutdown().await;
        }
        release_radio(self.radio.as_ref()).await;
        self.ledger.lock().clear();
        self.state.send_replace(CollectorState::Stopped);

        info!("Collector stopped");
        self.events.emit(RoleEvent::status("Teacher mode stopped"));
        self.events
            .emit(RoleEvent::status("Cleared captured student and ACK lists"));
    }
}

struct CollectTask {
    radio: Arc<dyn RadioPort>,
    events: Arc<dyn EventSink>,
    config: CollectorConfig,
    filter: ProximityFilter,
    subject: SubjectTag,
    ledger: Arc<Mutex<AckLedger>>,
    scan: Option<ScanStream>,
    job: Option<JoinHandle<()>>,
    /// Something new was discovered while `job` was running.
    rerun: bool,
}

impl CollectTask {
    async fn run(mut self, cancel: CancellationToken) {
        let period = self.config.retry_interval();
        let mut retry = time::interval_at(Instant::now() + period, period);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                finished = join_job(&mut self.job) => {
                    self.job = None;
                    if let Err(err) = finished {
                        warn!(error = %err, "Acknowledgment job failed");
                    }
                    if std::mem::take(&mut self.rerun) {
                        self.trigger(&cancel);
                    }
                }
                _ = retry.tick() => self.retry(&cancel).await,
                event = role::next_scan_event(&mut self.scan) => {
                    if self.drain_scan(event) {
                        if self.job.is_some() {
                            self.rerun = true;
                        } else {
                            self.trigger(&cancel);
                        }
                    }
                }
            }
        }

        // The job watches a child token, so it is already winding down.
        if let Some(job) = self.job.take() {
            if let Err(err) = job.await {
                warn!(error = %err, "Acknowledgment job failed");
            }
        }
        debug!("Collector task cancelled");
    }

    /// Handle `first` and everything already queued behind it, so a burst of
    /// discoveries lands in one acknowledgment job. Returns `true` if any new
    /// identity was recorded.
    fn drain_scan(&mut self, first: Option<ScanEvent>) -> bool {
        let mut discovered = false;
        let mut next = first;
        if next.is_none() {
            debug!("Scan stream closed, restarting on next retry");
            self.scan = None;
        }

        while let Some(event) = next.take() {
            match event {
                ScanEvent::Observation(observation) => {
                    discovered |= self.on_observation(&observation);
                }
                ScanEvent::Failed { code } => {
                    warn!(code, "Scan failed");
                    self.events
                        .emit(RoleEvent::error(format!("Scan failed: {code}")));
                    self.scan = None;
                }
            }
            next = self.scan.as_mut().and_then(|stream| stream.try_recv().ok());
        }
        discovered
    }

    fn on_observation(&self, observation: &ScanObservation) -> bool {
        let Some(BeaconFrame::Broadcast { identity }) = codec::decode(&observation.raw_name)
        else {
            return false;
        };

        let reading = self.filter.evaluate(observation.signal_strength);
        if !reading.accepted {
            trace!(identity = %identity, rssi = reading.rssi, "Ignoring distant broadcaster");
            return false;
        }

        if !self.ledger.lock().record(identity.clone()) {
            return false;
        }
        info!(
            identity = %identity,
            rssi = reading.rssi,
            distance_m = reading.distance_meters,
            "Student detected"
        );
        self.events.emit(RoleEvent::StudentDetected(identity));
        true
    }

    async fn retry(&mut self, cancel: &CancellationToken) {
        if self.scan.is_none() {
            match self.radio.start_scanning().await {
                Ok(stream) => {
                    debug!("Scan restarted");
                    self.scan = Some(stream);
                }
                Err(err) => report_radio_error(self.events.as_ref(), "Scan failed", &err),
            }
        }
        if self.job.is_none() && self.ledger.lock().has_pending() {
            debug!("Retrying unacknowledged identities");
            self.trigger(cancel);
        }
    }

    fn trigger(&mut self, cancel: &CancellationToken) {
        let pending = self.ledger.lock().pending();
        if pending.is_empty() {
            return;
        }

        let job = AckJob {
            radio: self.radio.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
            subject: self.subject.clone(),
            ledger: self.ledger.clone(),
            cancel: cancel.child_token(),
        };
        self.job = Some(tokio::spawn(job.run(pending).in_current_span()));
    }
}

async fn join_job(job: &mut Option<JoinHandle<()>>) -> std::result::Result<(), JoinError> {
    match job {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// One pass over the pending identities.
struct AckJob {
    radio: Arc<dyn RadioPort>,
    events: Arc<dyn EventSink>,
    config: CollectorConfig,
    subject: SubjectTag,
    ledger: Arc<Mutex<AckLedger>>,
    cancel: CancellationToken,
}

impl AckJob {
    async fn run(self, pending: Vec<Identity>) {
        let plan = match codec::encode_ack(&pending, &self.subject, self.config.batch_policy) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "Cannot encode acknowledgment");
                self.events
                    .emit(RoleEvent::error(format!("AdvertiseAck failed: {err}")));
                return;
            }
        };
        let unfit = self.ledger.lock().mark_unfit(&plan.unfit);
        for identity in &unfit {
            warn!(identity = %identity, subject = %self.subject, "Identity cannot be acknowledged");
            self.events.emit(RoleEvent::error(format!(
                "Cannot ACK {identity}: too long for a frame with subject {}",
                self.subject
            )));
        }
        if plan.is_empty() {
            if plan.unfit.is_empty() {
                self.events.emit(RoleEvent::status("No new students to ACK."));
            }
            return;
        }

        let total = plan.batches.len();
        debug!(pending = pending.len(), batches = total, "Acknowledging");

        for (position, batch) in plan.batches.into_iter().enumerate() {
            let index = position + 1;
            if self.cancel.is_cancelled() {
                return;
            }

            // Only this job marks identities while it runs, so a batch shrinks
            // only if the ledger was updated between `pending` and now.
            let identities = self.ledger.lock().unacked_of(&batch.identities);
            if identities.is_empty() {
                trace!(index, "Batch already acknowledged");
                continue;
            }
            let name = if identities.len() == batch.identities.len() {
                batch.name
            } else {
                match self.reencode(&identities) {
                    Some(name) => name,
                    None => continue,
                }
            };

            if !self.send_batch(index, total, &name, &identities).await {
                return;
            }
            if index < total && !sleep_or_cancel(&self.cancel, self.config.inter_batch_pause()).await
            {
                return;
            }
        }

        info!(batches = total, "Acknowledgment pass complete");
        self.events.emit(RoleEvent::status(format!(
            "New ACK batches completed ({total} total)"
        )));
    }

    fn reencode(&self, identities: &[Identity]) -> Option<String> {
        codec::encode_ack(identities, &self.subject, self.config.batch_policy)
            .ok()
            .and_then(|plan| plan.batches.into_iter().next())
            .map(|batch| batch.name)
    }

    /// Put one frame on the air. Returns `false` if cancelled.
    async fn send_batch(
        &self,
        index: usize,
        total: usize,
        name: &str,
        identities: &[Identity],
    ) -> bool {
        if !self.write_name(name).await {
            return true;
        }

        self.events.emit(RoleEvent::AckBroadcastProgress(format!(
            "Advertising ACK batch {index}/{total}: {name}"
        )));
        if let Err(err) = self
            .radio
            .start_advertising(name, Some(self.config.ack_on_air()))
            .await
        {
            report_radio_error(
                self.events.as_ref(),
                &format!("ACK batch {index} failed"),
                &err,
            );
            return true;
        }

        let held = sleep_or_cancel(&self.cancel, self.config.ack_hold()).await;
        if let Err(err) = self.radio.stop_advertising().await {
            debug!(error = %err, "Ignoring stop advertising failure after batch");
        }
        if !held {
            return false;
        }

        self.ledger.lock().mark_acked(identities);
        debug!(index, frame = %name, "Batch acknowledged");
        self.events.emit(RoleEvent::status(format!(
            "ACK batch {index} sent successfully"
        )));
        true
    }

    /// Write the local name unless it is already current. Returns `false` if
    /// the write failed.
    async fn write_name(&self, name: &str) -> bool {
        let cached = self.ledger.lock().is_current_name(name);
        if cached {
            trace!(frame = %name, "Local name already current");
            return true;
        }

        match self.radio.set_local_name(name).await {
            Ok(()) => {
                self.ledger.lock().last_name = Some(name.to_string());
                true
            }
            Err(err) => {
                report_radio_error(self.events.as_ref(), "Set name failed", &err);
                false
            }
        }
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

    fn setup() -> (CollectorRole, MockRadio, mpsc::UnboundedReceiver<RoleEvent>) {
        let radio = MockRadio::new();
        let (tx, rx) = mpsc::unbounded_channel::<RoleEvent>();
        let role = CollectorRole::new(
            Arc::new(radio.clone()),
            Arc::new(tx),
            CollectorConfig::default(),
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

    fn ids(values: &[&str]) -> Vec<Identity> {
        values.iter().copied().map(Identity::new).collect()
    }

    #[test]
    fn test_ledger_tracks_discovery_order() {
        let mut ledger = AckLedger::default();
        assert!(ledger.record(Identity::new("b")));
        assert!(ledger.record(Identity::new("a")));
        assert!(!ledger.record(Identity::new("b")));

        assert_eq!(ledger.pending(), ids(&["b", "a"]));
        ledger.mark_acked(&ids(&["a", "zz"]));
        assert_eq!(ledger.pending(), ids(&["b"]));
        assert_eq!(ledger.acknowledged(), ids(&["a"]));
        assert_eq!(ledger.unacked_of(&ids(&["a", "b"])), ids(&["b"]));
        assert!(ledger.has_pending());

        ledger.clear();
        assert!(ledger.detected().is_empty());
        assert!(!ledger.has_pending());
    }

    #[test]
    fn test_ledger_sets_aside_unfit_identities() {
        let mut ledger = AckLedger::default();
        ledger.record(Identity::new("long"));
        ledger.record(Identity::new("short"));

        assert_eq!(ledger.mark_unfit(&ids(&["long", "ghost"])), ids(&["long"]));
        assert!(ledger.mark_unfit(&ids(&["long"])).is_empty());
        assert_eq!(ledger.pending(), ids(&["short"]));
        assert_eq!(ledger.unfit(), ids(&["long"]));
        assert!(ledger.acknowledged().is_empty());

        ledger.mark_acked(&ids(&["short"]));
        assert!(!ledger.has_pending());

        ledger.clear();
        assert!(ledger.unfit().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_triggers_ack() {
        let (mut role, radio, mut rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();
        assert_eq!(role.state(), CollectorState::Scanning);

        radio.inject_name("AB:42:Z", -60);
        time::sleep(Duration::from_secs(2)).await;

        assert_eq!(radio.advertised_names(), vec!["AC:42:105:Z".to_string()]);
        assert_eq!(role.detected(), ids(&["42"]));
        assert_eq!(role.acknowledged(), ids(&["42"]));

        let events = drain(&mut rx);
        assert!(events.contains(&RoleEvent::StudentDetected(Identity::new("42"))));
        assert!(events.contains(&RoleEvent::AckBroadcastProgress(
            "Advertising ACK batch 1/1: AC:42:105:Z".into()
        )));
        assert!(events.contains(&RoleEvent::status("ACK batch 1 sent successfully")));
        assert!(events.contains(&RoleEvent::status("New ACK batches completed (1 total)")));
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_advertises_with_timeout_then_explicit_stop() {
        let (mut role, radio, _rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();
        radio.clear_calls();

        radio.inject_name("AB:42:Z", -60);
        time::sleep(Duration::from_secs(2)).await;

        assert_eq!(
            radio.calls(),
            vec![
                RadioCall::SetLocalName("AC:42:105:Z".into()),
                RadioCall::StartAdvertising {
                    name: "AC:42:105:Z".into(),
                    timeout: Some(Duration::from_millis(1_000)),
                },
                RadioCall::StopAdvertising,
            ]
        );
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_sightings_detected_once() {
        let (mut role, radio, mut rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();

        for _ in 0..5 {
            radio.inject_name("AB:42:Z", -60);
        }
        time::sleep(Duration::from_secs(3)).await;
        radio.inject_name("AB:42:Z", -55);
        time::sleep(Duration::from_secs(3)).await;

        let detections = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, RoleEvent::StudentDetected(_)))
            .count();
        assert_eq!(detections, 1);
        assert_eq!(radio.advertised_names().len(), 1);
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_foreign_and_distant_devices() {
        let (mut role, radio, mut rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();
        drain(&mut rx);

        radio.inject_name("MyHeadphones", -40);
        radio.inject_name("AB:7:Z", -90);
        radio.inject_name("AC:9:105:Z", -40);
        time::sleep(Duration::from_secs(6)).await;

        assert!(drain(&mut rx).is_empty());
        assert!(role.detected().is_empty());
        assert!(radio.advertised_names().is_empty());
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_batched_four_then_one() {
        let (mut role, radio, _rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();

        for id in ["1", "2", "3", "4", "5"] {
            radio.inject_name(&format!("AB:{id}:Z"), -60);
        }
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(
            radio.advertised_names(),
            vec!["AC:1,2,3,4:105:Z".to_string(), "AC:5:105:Z".to_string()]
        );
        assert_eq!(role.acknowledged().len(), 5);
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_during_job_is_picked_up_next() {
        let (mut role, radio, _rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();

        radio.inject_name("AB:1:Z", -60);
        time::sleep(Duration::from_millis(500)).await;
        radio.inject_name("AB:2:Z", -60);
        time::sleep(Duration::from_secs(3)).await;

        assert_eq!(
            radio.advertised_names(),
            vec!["AC:1:105:Z".to_string(), "AC:2:105:Z".to_string()]
        );
        assert_eq!(role.acknowledged(), ids(&["1", "2"]));
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_too_long_for_ack_is_not_marked() {
        let (mut role, radio, mut rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();
        drain(&mut rx);

        radio.inject_name("AB:abcdefghijklmnopqrst:Z", -60);
        time::sleep(Duration::from_secs(2)).await;

        assert!(radio.advertised_names().is_empty());
        assert_eq!(role.detected(), ids(&["abcdefghijklmnopqrst"]));
        assert!(role.acknowledged().is_empty());
        let errors = drain(&mut rx)
            .into_iter()
            .filter(RoleEvent::is_error)
            .count();
        assert_eq!(errors, 1);

        // Set aside, not retried.
        time::sleep(Duration::from_secs(11)).await;
        assert!(drain(&mut rx).is_empty());
        assert!(radio.advertised_names().is_empty());

        // Its 17-character prefix is a different student and is acknowledged alone.
        radio.inject_name("AB:abcdefghijklmnopq:Z", -60);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            radio.advertised_names(),
            vec!["AC:abcdefghijklmnopq:105:Z".to_string()]
        );
        assert_eq!(role.acknowledged(), ids(&["abcdefghijklmnopq"]));
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_is_refiltered_against_ledger_before_send() {
        let radio = MockRadio::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<RoleEvent>();
        let ledger = Arc::new(Mutex::new(AckLedger::default()));
        {
            let mut ledger = ledger.lock();
            for id in ["1", "2", "3", "4", "5"] {
                ledger.record(Identity::new(id));
            }
            ledger.mark_acked(&ids(&["2", "5"]));
        }

        let job = AckJob {
            radio: Arc::new(radio.clone()),
            events: Arc::new(tx),
            config: CollectorConfig::default(),
            subject: SubjectTag::new("105"),
            ledger: ledger.clone(),
            cancel: CancellationToken::new(),
        };
        job.run(ids(&["1", "2", "3", "4", "5"])).await;

        assert_eq!(radio.advertised_names(), vec!["AC:1,3,4:105:Z".to_string()]);
        assert_eq!(ledger.lock().acknowledged(), ids(&["1", "2", "3", "4", "5"]));
        assert!(drain(&mut rx).contains(&RoleEvent::status("New ACK batches completed (2 total)")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_retried() {
        let (mut role, radio, mut rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();
        radio.fail_operation(RadioOperation::StartAdvertising, 18);

        radio.inject_name("AB:42:Z", -60);
        time::sleep(Duration::from_secs(1)).await;
        assert!(role.acknowledged().is_empty());
        assert!(drain(&mut rx).iter().any(RoleEvent::is_error));

        radio.clear_failure(RadioOperation::StartAdvertising);
        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(role.acknowledged(), ids(&["42"]));
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_name_written_once_per_distinct_frame() {
        let (mut role, radio, _rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();
        radio.fail_operation(RadioOperation::StartAdvertising, 1);

        radio.inject_name("AB:42:Z", -60);
        time::sleep(Duration::from_secs(1)).await;
        radio.clear_failure(RadioOperation::StartAdvertising);
        time::sleep(Duration::from_secs(6)).await;

        let writes = radio
            .calls()
            .into_iter()
            .filter(|call| matches!(call, RadioCall::SetLocalName(_)))
            .count();
        assert_eq!(writes, 1);
        assert_eq!(radio.advertised_names().len(), 2);
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_failure_restarts_on_retry() {
        let (mut role, radio, mut rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();

        radio.inject_failure(2);
        time::sleep(Duration::from_millis(10)).await;
        assert!(drain(&mut rx).contains(&RoleEvent::error("Scan failed: 2")));

        radio.clear_calls();
        time::sleep(Duration::from_secs(5)).await;
        assert!(radio.calls().contains(&RadioCall::StartScanning));
        assert!(radio.inject_name("AB:42:Z", -60));
        role.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_batch_releases_radio() {
        let (mut role, radio, mut rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();

        radio.inject_name("AB:42:Z", -60);
        time::sleep(Duration::from_millis(300)).await;
        assert!(radio.is_advertising());

        role.stop().await;
        assert!(!radio.is_advertising());
        assert!(!radio.is_scanning());
        assert!(role.detected().is_empty());
        assert_eq!(role.state(), CollectorState::Stopped);

        radio.clear_calls();
        time::sleep(Duration::from_secs(10)).await;
        assert!(radio.calls().is_empty());

        let events = drain(&mut rx);
        assert!(events.contains(&RoleEvent::status("Teacher mode stopped")));
        assert!(events.contains(&RoleEvent::status("Cleared captured student and ACK lists")));
        assert!(!events.contains(&RoleEvent::status("ACK batch 1 sent successfully")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rules() {
        let (mut role, radio, _rx) = setup();
        role.start(SubjectTag::new("105")).await.unwrap();
        assert!(matches!(
            role.start(SubjectTag::new("106")).await,
            Err(RollcallError::AlreadyRunning {
                active: RoleKind::Collector
            })
        ));
        role.stop().await;
        role.stop().await;

        assert!(matches!(
            role.start(SubjectTag::new("::")).await,
            Err(RollcallError::Encoding(_))
        ));

        radio.set_enabled(false);
        assert!(matches!(
            role.start(SubjectTag::new("105")).await,
            Err(RollcallError::RadioUnavailable)
        ));
    }
}
