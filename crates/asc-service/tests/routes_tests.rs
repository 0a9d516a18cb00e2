//! HTTP surface tests.
//!
//! Drives the router with `tower::ServiceExt::oneshot` over a `TestHarness`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use asc_service::handlers::USER_ID_HEADER;
use asc_service::models::SessionType;
use asc_service::observability::HealthState;
use asc_service::routes::{build_routes, AppState};
use asc_test_utils::TestHarness;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::types::UserId;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(harness: &TestHarness) -> Router {
    let health = Arc::new(HealthState::new());
    health.set_ready();
    build_routes(
        Arc::new(AppState {
            service: Arc::clone(&harness.service),
        }),
        health,
        None,
        Duration::from_secs(5),
    )
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<UserId>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user.to_string());
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Probes answer without a user header.
#[tokio::test]
async fn test_health_and_ready() {
    let harness = TestHarness::new().await;
    let app = app(&harness);

    let (status, _) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

/// Session routes map onto the orchestrator and its errors.
#[tokio::test]
async fn test_session_routes() {
    let harness = TestHarness::new().await;
    let app = app(&harness);
    let alice = harness.member();
    let bob = harness.member();
    let sessions_uri = format!("/api/v1/groups/{}/sessions", harness.group_id);

    let (status, body) = send(
        &app,
        "POST",
        &sessions_uri,
        Some(alice),
        Some(json!({ "session_type": "voice_with_music" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["mode"], "routed");
    assert_eq!(body["session"]["status"], "active");
    let session_id = body["session"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &sessions_uri,
        Some(bob),
        Some(json!({ "session_type": "voice_only" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "conflict");

    let (status, body) = send(
        &app,
        "GET",
        &format!("{sessions_uri}/active"),
        Some(bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["id"], session_id.as_str());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{session_id}/join"),
        Some(bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "routed");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{session_id}/end"),
        Some(bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], 3);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{session_id}/end"),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ended");
}

/// Requests without a valid user are rejected before reaching the core.
#[tokio::test]
async fn test_missing_user_header_is_unauthorized() {
    let harness = TestHarness::new().await;
    let app = app(&harness);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/groups/{}/sessions", harness.group_id),
        None,
        Some(json!({ "session_type": "voice_only" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "unauthenticated");
    assert!(harness.store.is_empty());
}

/// Malformed bodies are a 400, not axum's default 422.
#[tokio::test]
async fn test_bad_body_is_bad_request() {
    let harness = TestHarness::new().await;
    let app = app(&harness);
    let alice = harness.member();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/groups/{}/sessions", harness.group_id),
        Some(alice),
        Some(json!({ "session_type": "karaoke" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 1);
}

/// Unknown sessions are a 404.
#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let harness = TestHarness::new().await;
    let app = app(&harness);

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/v1/sessions/{}", uuid::Uuid::new_v4()),
        Some(harness.member()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
}

/// Path parameters that do not parse are a JSON 400.
#[tokio::test]
async fn test_malformed_ids_are_bad_request() {
    let harness = TestHarness::new().await;
    let app = app(&harness);
    let alice = harness.member();

    let (status, body) = send(
        &app,
        "GET",
        "/api/v1/sessions/not-a-uuid",
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 1);
    assert_eq!(body["error"]["kind"], "bad_request");

    let (status, body) = send(
        &app,
        "GET",
        "/api/v1/groups/12345/sessions/active",
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 1);
}

/// Participants receive session events as server-sent events until the
/// session ends; others are refused.
#[tokio::test]
async fn test_event_stream() {
    let harness = TestHarness::new().await;
    let app = app(&harness);
    let alice = harness.member();
    let view = harness
        .create_session(alice, SessionType::VoiceOnly)
        .await
        .unwrap();
    let session_id = view.session.id;
    let uri = format!("/api/v1/sessions/{session_id}/events");

    let (status, body) = send(&app, "GET", &uri, Some(harness.member()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "permission_denied");

    let request = Request::builder()
        .uri(&uri)
        .header(USER_ID_HEADER, alice.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    harness
        .service
        .sessions
        .end_session(session_id, alice)
        .await
        .unwrap();

    let bytes = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("stream ends with the session")
        .unwrap()
        .to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: session_ended"), "{text}");
    assert!(text.contains(&session_id.to_string()), "{text}");

    let (status, _) = send(&app, "GET", &uri, Some(alice), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

/// Playlist and playback routes.
#[tokio::test]
async fn test_playback_routes() {
    let harness = TestHarness::new().await;
    let app = app(&harness);
    let alice = harness.member();

    let (_, body) = send(
        &app,
        "POST",
        &format!("/api/v1/groups/{}/sessions", harness.group_id),
        Some(alice),
        Some(json!({ "session_type": "voice_with_music" })),
    )
    .await;
    let session_id = body["session"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{session_id}/playback"),
        Some(alice),
        Some(json!({ "action": "play" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, track) = send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{session_id}/playlist"),
        Some(alice),
        Some(json!({ "title": "Intro", "duration": 95.0, "source_url": "https://media.test/intro.mp3" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(track["title"], "Intro");

    let (status, music) = send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{session_id}/playback"),
        Some(alice),
        Some(json!({ "action": "play" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(music["currently_playing"]["track"]["title"], "Intro");
    assert_eq!(music["currently_playing"]["controlled_by"], alice.to_string());

    let (status, _) = send(
        &app,
        "DELETE",
        &format!(
            "/api/v1/sessions/{session_id}/playlist/{}",
            track["id"].as_str().unwrap()
        ),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/v1/sessions/{session_id}/playlist"),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
