//! The radio capability both roles are written against.
//!
//! A [`RadioPort`] can set the advertised local name, advertise it, and scan
//! for other advertisements. Scan results arrive on a channel so a role task
//! can `select!` on them alongside its timers and cancellation.
//!
//! Implementations:
//!
//! - [`BluerRadio`](crate::bluetooth::BluerRadio) drives a BlueZ adapter
//!   (feature `bluetooth`).
//! - [`MockRadio`](crate::mock::MockRadio) records calls and lets tests inject
//!   scan traffic.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::ScanObservation;

/// Radio operations, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioOperation {
    /// Writing the adapter's local name.
    SetLocalName,
    /// Starting an advertisement.
    StartAdvertising,
    /// Stopping the advertisement.
    StopAdvertising,
    /// Starting discovery.
    StartScanning,
    /// Stopping discovery.
    StopScanning,
}

impl fmt::Display for RadioOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SetLocalName => "set local name",
            Self::StartAdvertising => "start advertising",
            Self::StopAdvertising => "stop advertising",
            Self::StartScanning => "start scanning",
            Self::StopScanning => "stop scanning",
        };
        f.write_str(label)
    }
}

/// Errors reported by a [`RadioPort`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    /// The radio is missing or switched off.
    #[error("Bluetooth radio is unavailable or powered off")]
    Unavailable,

    /// The platform rejected the operation with a numeric code.
    #[error("{operation} failed with code {code}")]
    OperationFailed {
        /// What was attempted.
        operation: RadioOperation,
        /// Platform error code.
        code: i32,
    },

    /// The driver failed with a message instead of a code.
    #[error("{operation} failed: {message}")]
    Driver {
        /// What was attempted.
        operation: RadioOperation,
        /// Driver message.
        message: String,
    },
}

impl RadioError {
    /// The operation that failed, if known.
    #[must_use]
    pub const fn operation(&self) -> Option<RadioOperation> {
        match self {
            Self::Unavailable => None,
            Self::OperationFailed { operation, .. } | Self::Driver { operation, .. } => {
                Some(*operation)
            }
        }
    }
}

/// Result type for radio operations.
pub type RadioResult<T> = std::result::Result<T, RadioError>;

/// One item delivered by an active scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// An advertisement was seen.
    Observation(ScanObservation),
    /// The scan failed asynchronously. The stream may still be open but no
    /// further observations should be expected until scanning restarts.
    Failed {
        /// Platform error code.
        code: i32,
    },
}

/// Receiver for scan results. Closed when scanning stops.
pub type ScanStream = mpsc::UnboundedReceiver<ScanEvent>;

/// BLE advertise and scan capability.
///
/// All methods may be called from any task. `stop_*` calls are best effort and
/// succeed when nothing is running.
#[async_trait]
pub trait RadioPort: Send + Sync {
    /// Whether the radio is present and powered.
    async fn is_radio_enabled(&self) -> bool;

    /// Write the adapter's local name. The next advertisement carries it.
    async fn set_local_name(&self, name: &str) -> RadioResult<()>;

    /// Start a non-connectable advertisement carrying `local_name` and no
    /// other payload. With a `timeout` the advertisement ends on its own.
    ///
    /// Any previous advertisement is replaced.
    async fn start_advertising(&self, local_name: &str, timeout: Option<Duration>)
        -> RadioResult<()>;

    /// Stop advertising.
    async fn stop_advertising(&self) -> RadioResult<()>;

    /// Start a low-latency scan that reports every advertisement seen,
    /// duplicates included.
    ///
    /// Any previous scan is replaced and its stream closes.
    async fn start_scanning(&self) -> RadioResult<ScanStream>;

    /// Stop scanning. The current stream closes.
    async fn stop_scanning(&self) -> RadioResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_error_messages() {
        let err = RadioError::OperationFailed {
            operation: RadioOperation::StartAdvertising,
            code: 3,
        };
        assert_eq!(err.to_string(), "start advertising failed with code 3");
        assert_eq!(err.operation(), Some(RadioOperation::StartAdvertising));

        let err = RadioError::Driver {
            operation: RadioOperation::StartScanning,
            message: "org.bluez.Error.InProgress".into(),
        };
        assert!(err.to_string().contains("InProgress"));

        assert_eq!(RadioError::Unavailable.operation(), None);
    }

    #[test]
    fn test_radio_port_is_object_safe() {
        fn assert_dyn(_: Option<&dyn RadioPort>) {}
        assert_dyn(None);
    }
}
