//! In-memory [`RadioPort`] for tests and radio-less hosts.
//!
//! `MockRadio` records every call, keeps the current advertisement and local
//! name, and lets a test push scan traffic into the active scan stream.
//! Clones share state, so a test can hold one handle while a role owns another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::radio::{RadioError, RadioOperation, RadioPort, RadioResult, ScanEvent, ScanStream};
use crate::types::ScanObservation;

/// A call made against a [`MockRadio`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    /// `set_local_name`
    SetLocalName(String),
    /// `start_advertising`
    StartAdvertising {
        /// Local name advertised.
        name: String,
        /// Requested timeout.
        timeout: Option<Duration>,
    },
    /// `stop_advertising`
    StopAdvertising,
    /// `start_scanning`
    StartScanning,
    /// `stop_scanning`
    StopScanning,
}

#[derive(Debug)]
struct MockState {
    enabled: bool,
    local_name: Option<String>,
    advertising: Option<String>,
    scan_tx: Option<mpsc::UnboundedSender<ScanEvent>>,
    failures: HashMap<RadioOperation, i32>,
    calls: Vec<RadioCall>,
}

/// Scriptable in-memory radio.
#[derive(Debug, Clone)]
pub struct MockRadio {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    /// Create an enabled radio with nothing running.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                enabled: true,
                local_name: None,
                advertising: None,
                scan_tx: None,
                failures: HashMap::new(),
                calls: Vec::new(),
            })),
        }
    }

    /// Switch the radio on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    /// Make every future `operation` fail with `code` until cleared.
    pub fn fail_operation(&self, operation: RadioOperation, code: i32) {
        self.state.lock().failures.insert(operation, code);
    }

    /// Let `operation` succeed again.
    pub fn clear_failure(&self, operation: RadioOperation) {
        self.state.lock().failures.remove(&operation);
    }

    /// Deliver an observation to the active scan. Returns `false` if no scan
    /// is running.
    pub fn inject(&self, observation: ScanObservation) -> bool {
        self.send(ScanEvent::Observation(observation))
    }

    /// Shorthand for [`inject`](Self::inject).
    pub fn inject_name(&self, raw_name: &str, signal_strength: i16) -> bool {
        self.inject(ScanObservation::new(raw_name, signal_strength))
    }

    /// Report an asynchronous scan failure to the active scan.
    pub fn inject_failure(&self, code: i32) -> bool {
        self.send(ScanEvent::Failed { code })
    }

    fn send(&self, event: ScanEvent) -> bool {
        let state = self.state.lock();
        state
            .scan_tx
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RadioCall> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Names passed to `start_advertising`, in order.
    #[must_use]
    pub fn advertised_names(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RadioCall::StartAdvertising { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// The local name currently on the air, if advertising.
    #[must_use]
    pub fn current_advertisement(&self) -> Option<String> {
        self.state.lock().advertising.clone()
    }

    /// Whether an advertisement is running.
    #[must_use]
    pub fn is_advertising(&self) -> bool {
        self.state.lock().advertising.is_some()
    }

    /// Whether a scan is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state
            .lock()
            .scan_tx
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Last name written with `set_local_name`.
    #[must_use]
    pub fn local_name(&self) -> Option<String> {
        self.state.lock().local_name.clone()
    }

    fn record(&self, call: RadioCall, operation: RadioOperation) -> RadioResult<()> {
        let mut state = self.state.lock();
        debug!(?call, "Mock radio call");
        state.calls.push(call);
        if !state.enabled {
            return Err(RadioError::Unavailable);
        }
        match state.failures.get(&operation) {
            Some(&code) => Err(RadioError::OperationFailed { operation, code }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RadioPort for MockRadio {
    async fn is_radio_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    async fn set_local_name(&self, name: &str) -> RadioResult<()> {
        self.record(RadioCall::SetLocalName(name.into()), RadioOperation::SetLocalName)?;
        self.state.lock().local_name = Some(name.into());
        Ok(())
    }

    async fn start_advertising(
        &self,
        local_name: &str,
        timeout: Option<Duration>,
    ) -> RadioResult<()> {
        self.record(
            RadioCall::StartAdvertising {
                name: local_name.into(),
                timeout,
            },
            RadioOperation::StartAdvertising,
        )?;
        self.state.lock().advertising = Some(local_name.into());
        Ok(())
    }

    async fn stop_advertising(&self) -> RadioResult<()> {
        self.record(RadioCall::StopAdvertising, RadioOperation::StopAdvertising)?;
        self.state.lock().advertising = None;
        Ok(())
    }

    async fn start_scanning(&self) -> RadioResult<ScanStream> {
        self.record(RadioCall::StartScanning, RadioOperation::StartScanning)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().scan_tx = Some(tx);
        Ok(rx)
    }

    async fn stop_scanning(&self) -> RadioResult<()> {
        self.record(RadioCall::StopScanning, RadioOperation::StopScanning)?;
        self.state.lock().scan_tx = None;
        Ok(())
    }
}
