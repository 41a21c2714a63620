//! Shared types and OpenAPI schemas.
//!
//! Identities and subject tags are opaque to the protocol: the application
//! layer assigns them, the codec sanitizes them on the way onto the air.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Short string uniquely naming a broadcaster (a student).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "42")]
pub struct Identity(String);

impl Identity {
    /// Wrap an identity string as assigned by the application layer.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identity text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Short string naming a collection session (class or subject code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "105")]
pub struct SubjectTag(String);

impl SubjectTag {
    /// Wrap a subject tag as assigned by the application layer.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the subject text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SubjectTag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One advertisement seen by the scanner. Consumed immediately, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanObservation {
    /// Local name carried in the advertisement.
    pub raw_name: String,
    /// Received signal strength in dBm.
    pub signal_strength: i16,
}

impl ScanObservation {
    /// Create an observation.
    pub fn new(raw_name: impl Into<String>, signal_strength: i16) -> Self {
        Self {
            raw_name: raw_name.into(),
            signal_strength,
        }
    }
}

/// The two protocol roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// Student side: announces an identity and waits to be acknowledged.
    Broadcaster,
    /// Teacher side: discovers identities and acknowledges them in batches.
    Collector,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcaster => f.write_str("broadcaster"),
            Self::Collector => f.write_str("collector"),
        }
    }
}

/// Lifecycle of a [`BroadcasterRole`](crate::broadcaster::BroadcasterRole).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BroadcasterState {
    /// Never started.
    Idle,
    /// Advertising the identity frame and scanning for acknowledgments.
    Advertising,
    /// Acknowledged or stopped by command. A new `start` re-enters `Advertising`.
    Stopped,
}

/// Lifecycle of a [`CollectorRole`](crate::collector::CollectorRole).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CollectorState {
    /// Never started.
    Idle,
    /// Scanning for identities and acknowledging them.
    Scanning,
    /// Stopped by command. A new `start` re-enters `Scanning`.
    Stopped,
}
