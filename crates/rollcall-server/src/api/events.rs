//! Event history API endpoint.
//!
//! The roles report progress as named events (`status`, `error`,
//! `studentDetected`, `ackBroadcastProgress`, `ackReceived`, `rssiInfo`).
//! The server keeps the most recent ones for polling clients.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::event_log::LoggedEvent;
use crate::state::SharedState;

/// Number of events returned when no limit is given.
const DEFAULT_LIMIT: usize = 50;

/// Creates the events router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_events))
}

/// Query parameters for the events endpoint.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventsQuery {
    /// Maximum number of events to return, newest last. Defaults to 50.
    #[param(example = 20, minimum = 1)]
    pub limit: Option<usize>,
}

/// Recent events response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventsResponse {
    /// Events, oldest first.
    pub events: Vec<LoggedEvent>,

    /// How many events the server retains.
    #[schema(example = 256)]
    pub capacity: usize,
}

/// Get recent role events.
#[utoipa::path(
    get,
    path = "/api/events",
    tag = "events",
    operation_id = "getEvents",
    summary = "Get recent events",
    description = "Returns the most recent events emitted by the roles and the \
        controller, oldest first. Older events are dropped once the log is full.",
    params(EventsQuery),
    responses(
        (status = 200, description = "Recent events", body = EventsResponse)
    )
)]
pub async fn get_events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let log = state.events();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(log.capacity());

    Json(EventsResponse {
        events: log.recent(limit).await,
        capacity: log.capacity(),
    })
}
