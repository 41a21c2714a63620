//! Router-level tests against the in-memory radio.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use rollcall_core::{BeaconConfig, MockRadio};
use rollcall_server::api::create_router;
use rollcall_server::state::{AppState, SharedState};
use serde_json::{json, Value};

fn setup() -> (TestServer, MockRadio, SharedState) {
    let radio = MockRadio::new();
    let state = AppState::new(BeaconConfig::default(), Arc::new(radio.clone()));
    let server = TestServer::new(create_router(state.clone())).unwrap();
    (server, radio, state)
}

#[tokio::test]
async fn health_reports_radio() {
    let (server, radio, _state) = setup();

    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["radio_enabled"], true);

    radio.set_enabled(false);
    let body: Value = server.get("/health").await.json();
    assert_eq!(body["radio_enabled"], false);
}

#[tokio::test(start_paused = true)]
async fn second_role_is_a_conflict() {
    let (server, _radio, state) = setup();

    let response = server
        .post("/api/collector")
        .json(&json!({ "subject": "105" }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["active_role"], "collector");
    assert_eq!(body["collector"]["subject"], "105");

    let response = server
        .post("/api/broadcaster")
        .json(&json!({ "identity": "42" }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"], "ALREADY_RUNNING");
    assert_eq!(body["details"]["active_role"], "collector");

    state.controller().await.stop().await;
}

#[tokio::test(start_paused = true)]
async fn empty_identity_is_a_bad_request() {
    let (server, radio, _state) = setup();

    let response = server
        .post("/api/broadcaster")
        .json(&json!({ "identity": "" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "ENCODING_ERROR");
    assert!(radio.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disabled_radio_is_unavailable() {
    let (server, radio, _state) = setup();
    radio.set_enabled(false);

    let response = server
        .post("/api/broadcaster")
        .json(&json!({ "identity": "42" }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"], "RADIO_UNAVAILABLE");
}

#[tokio::test(start_paused = true)]
async fn broadcaster_advertises_and_stop_is_idempotent() {
    let (server, radio, _state) = setup();

    server
        .post("/api/broadcaster")
        .json(&json!({ "identity": "42" }))
        .await
        .assert_status_ok();
    assert_eq!(radio.current_advertisement().as_deref(), Some("AB:42:Z"));

    for _ in 0..2 {
        let response = server.post("/api/stop").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["active_role"], Value::Null);
        assert_eq!(body["broadcaster"]["state"], "stopped");
    }
    assert!(!radio.is_advertising());
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn events_and_status_follow_the_collector() {
    let (server, radio, state) = setup();

    server
        .post("/api/collector")
        .json(&json!({ "subject": "105" }))
        .await
        .assert_status_ok();
    radio.inject_name("AB:42:Z", -60);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let status: Value = server.get("/api/status").await.json();
    assert_eq!(status["roles"]["collector"]["state"], "scanning");
    assert_eq!(status["roles"]["collector"]["detected"], json!(["42"]));
    assert_eq!(status["roles"]["collector"]["acknowledged"], json!(["42"]));

    let body: Value = server.get("/api/events").await.json();
    let events = body["events"].as_array().unwrap();
    assert!(events
        .iter()
        .any(|e| e["event"] == "status" && e["message"] == "Teacher mode started"));
    assert!(events
        .iter()
        .any(|e| e["event"] == "studentDetected" && e["message"] == "42"));
    assert!(events
        .iter()
        .any(|e| e["event"] == "status" && e["message"] == "ACK batch 1 sent successfully"));
    assert_eq!(body["capacity"], 256);

    let body: Value = server
        .get("/api/events")
        .add_query_param("limit", 1)
        .await
        .json();
    assert_eq!(body["events"].as_array().unwrap().len(), 1);

    state.controller().await.stop().await;
}

#[tokio::test]
async fn openapi_document_is_served() {
    let (server, _radio, _state) = setup();

    let response = server.get("/api/openapi.json").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["paths"]["/api/collector"]["post"].is_object());
    assert!(body["paths"]["/api/events"]["get"].is_object());
}
