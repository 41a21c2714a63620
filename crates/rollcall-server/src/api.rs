//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `roles` - Broadcaster/collector control and status
//! - `events` - Recent role events
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;

use crate::state::SharedState;

pub mod error;
pub mod events;
pub mod health;
pub mod openapi;
pub mod roles;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /broadcaster       - Start student mode (POST)
/// ├── /collector         - Start teacher mode (POST)
/// ├── /stop              - Stop the active role (POST)
/// ├── /status            - Role status
/// ├── /events            - Recent role events
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/events", events::router())
                .merge(roles::router()),
        )
        .with_state(state)
}
