//! OpenAPI specification generation for the rollcall API.
//!
//! The document is served at `/api/openapi.json` and written to the
//! workspace root by the `gen-openapi` binary for client generation.

use axum::Json;
use rollcall_core::{
    BroadcasterState, BroadcasterStatus, CollectorState, CollectorStatus, ControllerStatus,
    Identity, RoleKind, SubjectTag,
};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::events::EventsResponse;
use super::health::HealthResponse;
use super::roles::{StartBroadcasterRequest, StartCollectorRequest, StatusResponse};
use crate::event_log::LoggedEvent;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for rollcall.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "rollcall API",
        version = "0.1.0",
        description = r#"
# rollcall API

rollcall takes attendance over Bluetooth LE advertising, without pairing or
connections.

## Overview

A device runs one of two roles at a time:

1. **Broadcaster (student)**: advertises `AB:<identity>:Z` in its local name
   and stops once it hears an acknowledgment naming its identity.
2. **Collector (teacher)**: scans for broadcasters, records each nearby
   identity once, and advertises `AC:<ids>:<subject>:Z` acknowledgments in
   batches.

Progress is reported as events, available from `/api/events`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local rollcall server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "roles",
            description = "Start and stop the broadcaster and collector roles"
        ),
        (
            name = "events",
            description = "Recent role events"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Role endpoints
        super::roles::start_broadcaster,
        super::roles::start_collector,
        super::roles::stop,
        super::roles::get_status,
        // Event endpoints
        super::events::get_events,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Role types
            StartBroadcasterRequest,
            StartCollectorRequest,
            StatusResponse,
            ControllerStatus,
            BroadcasterStatus,
            CollectorStatus,
            RoleKind,
            BroadcasterState,
            CollectorState,
            Identity,
            SubjectTag,
            // Event types
            EventsResponse,
            LoggedEvent,
        )
    )
)]
pub struct ApiDoc;
