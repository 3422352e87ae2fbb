//! HTTP surface: webhooks through the router, listing, lifecycle, jobs

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::{harness, Harness};
use scrobd_server::api::{create_router, AppState};

fn router(h: &Harness) -> Router {
    create_router(AppState {
        engine: h.engine.clone(),
        port: 0,
    })
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_module_and_version() {
    let h = harness().await;
    let app = router(&h);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "scrobd-server");
}

#[tokio::test]
async fn mopidy_webhook_drives_a_full_session() {
    let h = harness().await;
    let app = router(&h);

    let (status, started) = send(
        &app,
        "POST",
        "/api/v1/webhook/mopidy",
        Some(json!({
            "track": "Same in the End",
            "artist": "Sublime",
            "run_time": 156,
            "status": "resumed"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["in_progress"], true);
    assert_eq!(started["media_title"], "Same in the End");

    h.clock.advance_secs(150);
    let (status, stopped) = send(
        &app,
        "POST",
        "/api/v1/webhook/mopidy",
        Some(json!({
            "track": "Same in the End",
            "artist": "Sublime",
            "run_time": 156,
            "playback_time_ticks": 150_000,
            "status": "stopped"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["in_progress"], false);
    assert_eq!(stopped["played_to_completion"], true);
    // Same listen from start to stop
    assert_eq!(stopped["guid"], started["guid"]);
}

#[tokio::test]
async fn scrobbles_list_includes_derived_percent() {
    let h = harness().await;
    let app = router(&h);

    send(
        &app,
        "POST",
        "/api/v1/webhook/mopidy",
        Some(json!({
            "track": "Santeria",
            "artist": "Sublime",
            "run_time": 200,
            "playback_time_ticks": 100_000,
            "status": "resumed"
        })),
    )
    .await;

    let (status, body) = send(&app, "GET", "/api/v1/scrobbles", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["scrobbles"].as_array().expect("scrobbles array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["percent_played"], 50);
    assert_eq!(rows[0]["source"], "mopidy");
}

#[tokio::test]
async fn finish_and_cancel_round_trip() {
    let h = harness().await;
    let app = router(&h);

    let (_, started) = send(
        &app,
        "POST",
        "/api/v1/webhook/mopidy",
        Some(json!({ "track": "Loop", "artist": "Band", "run_time": 300 })),
    )
    .await;
    let guid = started["guid"].as_str().unwrap().to_string();

    let (status, finished) = send(
        &app,
        "POST",
        &format!("/api/v1/scrobbles/{}/finish", guid),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(finished["in_progress"], false);

    let (status, cancelled) =
        send(&app, "DELETE", &format!("/api/v1/scrobbles/{}", guid), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, _) = send(&app, "GET", &format!("/api/v1/scrobbles/{}", guid), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_scrobble_is_not_found() {
    let h = harness().await;
    let app = router(&h);

    let uri = format!("/api/v1/scrobbles/{}", Uuid::new_v4());
    let (status, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["status"].as_str().unwrap().starts_with("error"));
}

#[tokio::test]
async fn identity_free_payload_is_a_client_error() {
    let h = harness().await;
    let app = router(&h);

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/webhook/mopidy",
        Some(json!({ "track": "orphan" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn zombie_sweep_endpoint_honors_dry_run() {
    let h = harness().await;
    let app = router(&h);

    send(
        &app,
        "POST",
        "/api/v1/webhook/mopidy",
        Some(json!({ "track": "Ghost", "artist": "Band", "run_time": 300 })),
    )
    .await;
    h.clock.advance_secs(4 * 86400);

    let (status, dry) = send(
        &app,
        "POST",
        "/api/v1/jobs/zombie-sweep",
        Some(json!({ "dry_run": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dry["candidates"], 1);
    assert_eq!(dry["deleted"], 0);

    let (status, wet) = send(&app, "POST", "/api/v1/jobs/zombie-sweep", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(wet["deleted"], 1);
}

#[tokio::test]
async fn gpslogger_webhook_tracks_location() {
    let h = harness().await;
    let app = router(&h);

    let (status, first) = send(
        &app,
        "POST",
        "/api/v1/webhook/gpslogger",
        Some(json!({ "lat": 52.3700, "lon": 4.8900, "acc": 5.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["in_progress"], true);

    h.clock.advance_secs(120);
    let (_, second) = send(
        &app,
        "POST",
        "/api/v1/webhook/gpslogger",
        Some(json!({ "lat": 52.3701, "lon": 4.8900, "acc": 5.0 })),
    )
    .await;
    assert_eq!(second["guid"], first["guid"]);
}
