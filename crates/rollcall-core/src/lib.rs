//! # rollcall-core
//!
//! Proximity attendance over BLE advertising, without connections.
//!
//! A student device (the *broadcaster*) puts `AB:<identity>:Z` in its
//! advertised local name. A teacher device (the *collector*) scans, records
//! each nearby identity once, and answers with `AC:<ids>:<subject>:Z` frames
//! naming batches of identities. A broadcaster that sees its identity in an
//! acknowledgment reports the subject and stops.
//!
//! ## Architecture
//!
//! - [`codec`] - frame encoding, decoding, and batching under the name budget
//! - [`proximity`] - RSSI gate and distance estimate
//! - [`radio`] - the [`RadioPort`] capability the roles drive
//! - [`events`] - outbound [`RoleEvent`]s and the [`EventSink`] they go to
//! - [`broadcaster`] / [`collector`] - the two role state machines
//! - [`controller`] - one-role-at-a-time entry point for the application
//! - [`config`] - layered configuration
//! - [`error`] - unified error types for the crate
//! - [`types`] - shared types and OpenAPI schemas
//! - `mock` - in-memory radio (without `bluetooth`, or with `mock-radio`)
//! - `bluetooth` - BlueZ radio (feature `bluetooth`)

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod broadcaster;
pub mod codec;
pub mod collector;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
#[cfg(any(feature = "mock-radio", not(feature = "bluetooth")))]
pub mod mock;
pub mod proximity;
pub mod radio;
mod role;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluerRadio;
pub use broadcaster::BroadcasterRole;
pub use codec::{
    ack_capacity, decode, encode_ack, encode_broadcast, AckBatch, AckPlan, BatchPolicy,
    BeaconFrame, EncodingError, MAX_LOCAL_NAME_LEN,
};
pub use collector::{AckLedger, CollectorRole};
pub use crate::config::{
    BeaconConfig, BroadcasterConfig, CollectorConfig, ConfigError, ServerConfig,
};
pub use controller::{BeaconController, BroadcasterStatus, CollectorStatus, ControllerStatus};
pub use error::{Result, RollcallError};
pub use events::{EventSink, RoleEvent};
#[cfg(any(feature = "mock-radio", not(feature = "bluetooth")))]
pub use mock::{MockRadio, RadioCall};
pub use proximity::{ProximityConfig, ProximityFilter, ProximityReading};
pub use radio::{RadioError, RadioOperation, RadioPort, RadioResult, ScanEvent, ScanStream};
pub use types::{
    BroadcasterState, CollectorState, Identity, RoleKind, ScanObservation, SubjectTag,
};
