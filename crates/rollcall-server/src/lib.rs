//! # rollcall-server
//!
//! HTTP server library for the rollcall BLE attendance system.
//!
//! This library provides the API handlers, the event log, and state
//! management around a [`rollcall_core::BeaconController`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod event_log;
pub mod logging;
pub mod state;
