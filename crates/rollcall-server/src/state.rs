//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use rollcall_core::{BeaconConfig, BeaconController, RadioPort, RoleEvent};
use tokio::sync::{broadcast, Mutex, MutexGuard};

use crate::event_log::{self, EventLog};

/// State handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Shared application state.
pub struct AppState {
    config: BeaconConfig,
    radio: Arc<dyn RadioPort>,
    controller: Mutex<BeaconController>,
    events: Arc<EventLog>,
    started_at: Instant,
}

impl AppState {
    /// Wire a controller to `radio` and start pumping its events into the
    /// event log. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: BeaconConfig, radio: Arc<dyn RadioPort>) -> SharedState {
        let capacity = config.server.event_log_capacity.max(1);
        let (tx, rx) = broadcast::channel::<RoleEvent>(capacity);

        let events = Arc::new(EventLog::new(capacity));
        event_log::spawn_pump(events.clone(), rx);

        let controller = BeaconController::new(radio.clone(), Arc::new(tx), &config);
        Arc::new(Self {
            config,
            radio,
            controller: Mutex::new(controller),
            events,
            started_at: Instant::now(),
        })
    }

    /// Loaded configuration.
    pub const fn config(&self) -> &BeaconConfig {
        &self.config
    }

    /// The radio the controller drives.
    pub fn radio(&self) -> &dyn RadioPort {
        self.radio.as_ref()
    }

    /// Exclusive access to the controller.
    pub async fn controller(&self) -> MutexGuard<'_, BeaconController> {
        self.controller.lock().await
    }

    /// Recent role events.
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Seconds since the state was created.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
