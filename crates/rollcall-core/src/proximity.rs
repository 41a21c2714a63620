//! RSSI gating and rough distance estimation.
//!
//! Only signal strength decides acceptance. The distance estimate is a
//! log-distance path-loss figure reported for display and diagnostics.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default acceptance threshold in dBm.
pub const DEFAULT_THRESHOLD_DBM: i16 = -75;

/// Default measured power at one metre in dBm.
pub const DEFAULT_REFERENCE_POWER_DBM: i16 = -59;

/// Default path-loss exponent (free space).
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.0;

/// Whether an observation at `rssi` is close enough to act on.
///
/// Signal at or above the threshold passes.
#[inline]
#[must_use]
pub const fn accept(rssi: i16, threshold: i16) -> bool {
    rssi >= threshold
}

/// Estimate distance in metres from signal strength.
///
/// `10 ^ ((reference_power - rssi) / (10 * path_loss_exponent))`
#[must_use]
pub fn estimate_distance_meters(rssi: i16, reference_power: i16, path_loss_exponent: f64) -> f64 {
    let exponent = f64::from(reference_power - rssi) / (10.0 * path_loss_exponent);
    10f64.powf(exponent)
}

/// Result of evaluating one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProximityReading {
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Estimated distance in metres.
    pub distance_meters: f64,
    /// Whether the observation passes the filter.
    pub accepted: bool,
}

/// Settings for [`ProximityFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ProximityConfig {
    /// Minimum accepted RSSI in dBm.
    pub threshold_dbm: i16,
    /// Measured power at one metre in dBm.
    pub reference_power_dbm: i16,
    /// Environmental path-loss exponent.
    pub path_loss_exponent: f64,
    /// When false every observation passes, regardless of strength.
    pub reject_far_devices: bool,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            threshold_dbm: DEFAULT_THRESHOLD_DBM,
            reference_power_dbm: DEFAULT_REFERENCE_POWER_DBM,
            path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
            reject_far_devices: true,
        }
    }
}

/// Stateless filter applied by both roles to every recognized frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProximityFilter {
    config: ProximityConfig,
}

impl ProximityFilter {
    /// Create a filter from settings.
    #[must_use]
    pub const fn new(config: ProximityConfig) -> Self {
        Self { config }
    }

    /// The settings in use.
    #[must_use]
    pub const fn config(&self) -> &ProximityConfig {
        &self.config
    }

    /// Evaluate one observation.
    #[must_use]
    pub fn evaluate(&self, rssi: i16) -> ProximityReading {
        ProximityReading {
            rssi,
            distance_meters: estimate_distance_meters(
                rssi,
                self.config.reference_power_dbm,
                self.config.path_loss_exponent,
            ),
            accepted: !self.config.reject_far_devices || accept(rssi, self.config.threshold_dbm),
        }
    }
}
