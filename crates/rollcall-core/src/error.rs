//! Unified error types for the rollcall core library.
//!
//! [`RollcallError`] covers every failure a caller of this crate can see.
//! Modules keep their own narrower errors ([`EncodingError`], [`RadioError`],
//! [`ConfigError`](crate::config::ConfigError)) and convert into it with `From`.
//!
//! Radio failures inside a running role never reach the caller. They are
//! logged and emitted as [`RoleEvent::Error`](crate::events::RoleEvent::Error).
//! Only `start` and configuration loading return errors.
//!
//! # Example
//!
//! ```rust
//! use rollcall_core::error::{Result, RollcallError};
//! use rollcall_core::types::RoleKind;
//!
//! fn admit(running: Option<RoleKind>) -> Result<()> {
//!     if let Some(active) = running {
//!         return Err(RollcallError::AlreadyRunning { active });
//!     }
//!     Ok(())
//! }
//!
//! assert!(admit(Some(RoleKind::Collector)).unwrap_err().is_caller_error());
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::EncodingError;
use crate::radio::{RadioError, RadioOperation};
use crate::types::RoleKind;

/// The unified error type for all rollcall operations.
#[derive(Debug, Error)]
pub enum RollcallError {
    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// The Bluetooth radio is absent or powered off.
    #[error(
        "Bluetooth unavailable or disabled. Ensure an adapter is present and powered on \
         (e.g. 'bluetoothctl power on')."
    )]
    RadioUnavailable,

    /// The radio rejected an operation.
    #[error("Radio operation '{operation}' failed: {reason}")]
    OperationFailed {
        /// What was attempted.
        operation: RadioOperation,
        /// Platform code or driver message.
        reason: String,
    },

    // =========================================================================
    // CALLER ERRORS
    // =========================================================================
    /// A role is already running. Stop it before starting another.
    #[error("The {active} role is already running. Stop it before starting a new one.")]
    AlreadyRunning {
        /// The role currently running.
        active: RoleKind,
    },

    /// An identity or subject cannot be carried in a frame.
    #[error("Invalid frame content: {0}")]
    Encoding(#[from] EncodingError),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for rollcall operations.
pub type Result<T> = std::result::Result<T, RollcallError>;

impl RollcallError {
    /// Returns `true` if this error came from the radio.
    #[inline]
    #[must_use]
    pub const fn is_radio_error(&self) -> bool {
        matches!(self, Self::RadioUnavailable | Self::OperationFailed { .. })
    }

    /// Returns `true` if the caller can fix this by changing its request.
    #[inline]
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. } | Self::Encoding(_))
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if retrying later may succeed without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::OperationFailed { .. })
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::Encoding(_) => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 409 Conflict - a role already holds the radio
            Self::AlreadyRunning { .. } => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::OperationFailed { .. } | Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 503 Service Unavailable - radio hardware issues
            Self::RadioUnavailable => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::RadioUnavailable => "RADIO_UNAVAILABLE",
            Self::OperationFailed { .. } => "OPERATION_FAILED",
            Self::AlreadyRunning { .. } => "ALREADY_RUNNING",
            Self::Encoding(_) => "ENCODING_ERROR",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<RadioError> for RollcallError {
    fn from(err: RadioError) -> Self {
        match err {
            RadioError::Unavailable => Self::RadioUnavailable,
            RadioError::OperationFailed { operation, code } => Self::OperationFailed {
                operation,
                reason: format!("code {code}"),
            },
            RadioError::Driver { operation, message } => Self::OperationFailed {
                operation,
                reason: message,
            },
        }
    }
}

impl From<crate::config::ConfigError> for RollcallError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::NoConfigDir => {
                Self::PersistenceError("Cannot determine config directory".into())
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
