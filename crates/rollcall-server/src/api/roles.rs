//! Role control API endpoints.
//!
//! A device is either a student (broadcaster) advertising its identity or a
//! teacher (collector) acknowledging the identities it hears. Only one role
//! runs at a time; starting a second one is a conflict until `stop`.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::{ControllerStatus, Identity, SubjectTag};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the roles router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/broadcaster", post(start_broadcaster))
        .route("/collector", post(start_collector))
        .route("/stop", post(stop))
        .route("/status", get(get_status))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for starting the broadcaster.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "identity": "42" }))]
pub struct StartBroadcasterRequest {
    /// Identity to advertise. Characters outside `[A-Za-z0-9._-]` are dropped
    /// before it goes on the air.
    #[schema(example = "42", min_length = 1)]
    pub identity: String,
}

/// Request body for starting the collector.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "subject": "105" }))]
pub struct StartCollectorRequest {
    /// Subject tag carried in every acknowledgment.
    #[schema(example = "105", min_length = 1)]
    pub subject: String,
}

/// Server status including both roles.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// Server version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Server uptime in seconds.
    #[schema(example = 3600)]
    pub uptime_secs: u64,

    /// Whether the Bluetooth radio is present and powered.
    #[schema(example = true)]
    pub radio_enabled: bool,

    /// Role details.
    pub roles: ControllerStatus,
}

// ============================================================================
// Handlers
// ============================================================================

/// Start advertising an identity.
#[utoipa::path(
    post,
    path = "/api/broadcaster",
    tag = "roles",
    operation_id = "startBroadcaster",
    summary = "Start student mode",
    description = "Advertises `AB:<identity>:Z` and listens for an acknowledgment \
        naming this identity. The role stops by itself once acknowledged.",
    request_body = StartBroadcasterRequest,
    responses(
        (status = 200, description = "Broadcaster started", body = ControllerStatus),
        (status = 400, description = "Identity is empty after sanitizing", body = ErrorResponse),
        (status = 409, description = "A role is already running", body = ErrorResponse),
        (status = 503, description = "Bluetooth unavailable or disabled", body = ErrorResponse)
    )
)]
pub async fn start_broadcaster(
    State(state): State<SharedState>,
    Json(request): Json<StartBroadcasterRequest>,
) -> ApiResult<Json<ControllerStatus>> {
    let mut controller = state.controller().await;
    controller
        .start_broadcaster(Identity::new(request.identity))
        .await?;
    Ok(Json(controller.status()))
}

/// Start collecting identities for a subject.
#[utoipa::path(
    post,
    path = "/api/collector",
    tag = "roles",
    operation_id = "startCollector",
    summary = "Start teacher mode",
    description = "Scans for `AB:` frames and acknowledges every new identity in \
        `AC:<ids>:<subject>:Z` batches.",
    request_body = StartCollectorRequest,
    responses(
        (status = 200, description = "Collector started", body = ControllerStatus),
        (status = 400, description = "Subject is empty after sanitizing", body = ErrorResponse),
        (status = 409, description = "A role is already running", body = ErrorResponse),
        (status = 503, description = "Bluetooth unavailable or disabled", body = ErrorResponse)
    )
)]
pub async fn start_collector(
    State(state): State<SharedState>,
    Json(request): Json<StartCollectorRequest>,
) -> ApiResult<Json<ControllerStatus>> {
    let mut controller = state.controller().await;
    controller
        .start_collector(SubjectTag::new(request.subject))
        .await?;
    Ok(Json(controller.status()))
}

/// Stop whichever role is running.
#[utoipa::path(
    post,
    path = "/api/stop",
    tag = "roles",
    operation_id = "stopRoles",
    summary = "Stop all BLE operations",
    description = "Stops the active role and releases the radio. Safe to call \
        when nothing is running.",
    responses(
        (status = 200, description = "Everything stopped", body = ControllerStatus)
    )
)]
pub async fn stop(State(state): State<SharedState>) -> Json<ControllerStatus> {
    let mut controller = state.controller().await;
    controller.stop().await;
    info!("Stopped via API");
    Json(controller.status())
}

/// Current status.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "roles",
    operation_id = "getStatus",
    summary = "Get role status",
    description = "Returns which role is running, its state, and the identities \
        detected and acknowledged in the current collector session.",
    responses(
        (status = 200, description = "Current status", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let radio_enabled = state.radio().is_radio_enabled().await;
    let roles = state.controller().await.status();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        radio_enabled,
        roles,
    })
}
