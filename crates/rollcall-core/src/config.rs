//! Application configuration management.
//!
//! Handles loading, saving, and validating rollcall configuration:
//! - broadcaster refresh cadence
//! - collector acknowledgment timing and batch policy
//! - proximity threshold and distance model
//! - server bind address and event log size
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `ROLLCALL_*` environment variables
//! (`ROLLCALL_COLLECTOR__ACK_ON_AIR_MS=1500`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::codec::BatchPolicy;
use crate::proximity::ProximityConfig;

const ENV_PREFIX: &str = "ROLLCALL";
const ENV_SEPARATOR: &str = "__";

/// Errors raised while loading, validating, or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// No platform config directory could be determined.
    #[error("Cannot determine config directory")]
    NoConfigDir,

    /// The file could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A source could not be read or deserialized.
    #[error(transparent)]
    ParseError(#[from] ::config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error(transparent)]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} invalid configuration values", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct BeaconConfig {
    /// Broadcaster (student) settings.
    pub broadcaster: BroadcasterConfig,
    /// Collector (teacher) settings.
    pub collector: CollectorConfig,
    /// Proximity filter settings, shared by both roles.
    pub proximity: ProximityConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Broadcaster settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// How often the advertisement is stopped and restarted.
    pub refresh_interval_ms: u64,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 2_000,
        }
    }
}

impl BroadcasterConfig {
    /// Refresh interval as a [`Duration`].
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Collector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct CollectorConfig {
    /// How long each acknowledgment frame stays on the air.
    pub ack_on_air_ms: u64,
    /// Extra wait after the on-air time before the explicit stop.
    pub ack_settle_buffer_ms: u64,
    /// Pause between consecutive batches.
    pub inter_batch_pause_ms: u64,
    /// How often unacknowledged identities and failed scans are retried.
    pub retry_interval_ms: u64,
    /// How identities are grouped into frames.
    pub batch_policy: BatchPolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            ack_on_air_ms: 1_000,
            ack_settle_buffer_ms: 100,
            inter_batch_pause_ms: 200,
            retry_interval_ms: 5_000,
            batch_policy: BatchPolicy::default(),
        }
    }
}

impl CollectorConfig {
    /// On-air time as a [`Duration`].
    #[must_use]
    pub const fn ack_on_air(&self) -> Duration {
        Duration::from_millis(self.ack_on_air_ms)
    }

    /// On-air time plus settle buffer.
    #[must_use]
    pub const fn ack_hold(&self) -> Duration {
        Duration::from_millis(self.ack_on_air_ms + self.ack_settle_buffer_ms)
    }

    /// Inter-batch pause as a [`Duration`].
    #[must_use]
    pub const fn inter_batch_pause(&self) -> Duration {
        Duration::from_millis(self.inter_batch_pause_ms)
    }

    /// Retry interval as a [`Duration`].
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
    /// Number of recent events kept for `/api/events`.
    pub event_log_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".into(),
            event_log_capacity: 256,
        }
    }
}

impl BeaconConfig {
    /// Load configuration from the default location.
    ///
    /// A missing file is not an error; defaults and environment apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_layered(&path, false)
    }

    /// Load configuration from an explicit file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or an
    /// error if it cannot be parsed or validation fails.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load_layered(path, true)
    }

    fn load_layered(path: &Path, required: bool) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), required, "Loading configuration");

        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration as TOML to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_error = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(path, content).map_err(write_error)?;

        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MultipleValidationErrors`] listing each invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: &str| {
            errors.push(ConfigError::ValidationError {
                field: field.into(),
                message: message.into(),
            });
        };

        if self.broadcaster.refresh_interval_ms == 0 {
            invalid("broadcaster.refresh_interval_ms", "must be greater than zero");
        }
        if self.collector.ack_on_air_ms == 0 {
            invalid("collector.ack_on_air_ms", "must be greater than zero");
        }
        if self.collector.retry_interval_ms == 0 {
            invalid("collector.retry_interval_ms", "must be greater than zero");
        }
        if self.collector.batch_policy.max_identities() == 0 {
            invalid(
                "collector.batch_policy.max_identities",
                "must be at least 1",
            );
        }
        if !(-100..=0).contains(&self.proximity.threshold_dbm) {
            invalid("proximity.threshold_dbm", "must be between -100 and 0 dBm");
        }
        if !(-100..=0).contains(&self.proximity.reference_power_dbm) {
            invalid(
                "proximity.reference_power_dbm",
                "must be between -100 and 0 dBm",
            );
        }
        if !self.proximity.path_loss_exponent.is_finite() || self.proximity.path_loss_exponent <= 0.0
        {
            invalid("proximity.path_loss_exponent", "must be a positive number");
        }
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            invalid("server.bind_address", "must be a socket address like 0.0.0.0:3000");
        }
        if self.server.event_log_capacity == 0 {
            invalid("server.event_log_capacity", "must be greater than zero");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MultipleValidationErrors(errors))
        }
    }

    /// Get the configuration file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfigDir`] off Linux when no home directory exists.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        // On a Linux host: /etc/rollcall/config.toml
        // Elsewhere: the platform config dir, e.g. ~/Library/Application Support/rollcall
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/rollcall/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "rollcall")
                .ok_or(ConfigError::NoConfigDir)?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }
}
