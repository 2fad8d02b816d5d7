//! HTTP round-trip tests for the session API.
//!
//! Requests go straight into the router with `tower::ServiceExt::oneshot`,
//! no socket involved.

#![cfg(feature = "server")]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::Engine;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use rockit::server::{router, AppState};
use rockit::RockitConfig;
use serde_json::{json, Value};
use std::io::Cursor;
use tempfile::TempDir;
use tower::ServiceExt;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn app() -> (TempDir, AppState, Router) {
    let root = TempDir::new().unwrap();
    let config = RockitConfig::builder()
        .temp_root(root.path())
        .build()
        .unwrap();
    let state = AppState::new(config);
    let app = router(state.clone());
    (root, state, app)
}

fn png_data_uri() -> String {
    let img = RgbaImage::from_pixel(4, 4, Rgba([0, 128, 255, 200]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    let payload = base64::engine::general_purpose::STANDARD.encode(buf);
    format!("data:image/png;base64,{payload}")
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, bytes) = send(app, req).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn open_session(app: &Router) -> String {
    let (status, body) = post_json(app, "/api/sessions", json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    body["session_id"].as_str().unwrap().to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let (_root, _state, app) = app();
    let (status, bytes) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_upload_convert_download() {
    let (_root, _state, app) = app();
    let id = open_session(&app).await;

    let (status, body) = post_json(
        &app,
        &format!("/api/sessions/{id}/uploads"),
        json!({ "files": [{ "filename": "sky.png", "contents": png_data_uri() }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "staged");
    assert_eq!(body["status_message"], "Added 1 file(s). 1 file(s) staged.");

    let (status, body) = post_json(
        &app,
        &format!("/api/sessions/{id}/transform"),
        json!({ "kind": "convert", "target_format": "jpg" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "ready");
    assert_eq!(body["items"][0]["artifact"], "sky.jpg");
    assert_eq!(body["status_message"], "Successfully converted sky.png to JPG.");

    let req = Request::get(format!("/download/{id}/sky.jpg"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"sky.jpg\""
    );
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
}

#[tokio::test]
async fn test_download_unknown_artifact_is_404() {
    let (_root, _state, app) = app();
    let id = open_session(&app).await;
    let (status, bytes) = send(
        &app,
        Request::get(format!("/download/{id}/nothing.pdf"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let (_root, _state, app) = app();
    let (status, body) = post_json(
        &app,
        "/api/sessions/not-a-session/reset",
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "UNKNOWN_SESSION");
}

#[tokio::test]
async fn test_transform_without_upload_reports_failure() {
    let (_root, _state, app) = app();
    let id = open_session(&app).await;
    let (status, body) = post_json(
        &app,
        &format!("/api/sessions/{id}/transform"),
        json!({ "kind": "merge" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "failed");
    assert_eq!(body["outcome"]["code"], "EMPTY_BATCH");
}

#[tokio::test]
async fn test_bad_data_uri_is_400() {
    let (_root, _state, app) = app();
    let id = open_session(&app).await;
    let (status, body) = post_json(
        &app,
        &format!("/api/sessions/{id}/uploads"),
        json!({ "files": [{ "filename": "x.png", "contents": "no comma here" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "DECODE_ERROR");
}

#[tokio::test]
async fn test_close_session_drops_it() {
    let (_root, state, app) = app();
    let id = open_session(&app).await;
    assert_eq!(state.session_count().await, 1);

    let req = Request::delete(format!("/api/sessions/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(state.session_count().await, 0);

    let (status, _) = post_json(&app, &format!("/api/sessions/{id}/reset"), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn app_with_ttl(ttl: std::time::Duration) -> (TempDir, AppState, Router) {
    let root = TempDir::new().unwrap();
    let config = RockitConfig::builder()
        .temp_root(root.path())
        .session_ttl(ttl)
        .build()
        .unwrap();
    let state = AppState::new(config);
    let app = router(state.clone());
    (root, state, app)
}

#[tokio::test]
async fn test_idle_sessions_are_evicted() {
    let (root, state, app) = app_with_ttl(std::time::Duration::from_millis(300));
    let idle = open_session(&app).await;
    let busy = open_session(&app).await;

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let (status, _) = post_json(&app, &format!("/api/sessions/{busy}/reset"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    assert_eq!(state.evict_idle().await, 1);
    assert_eq!(state.session_count().await, 1);

    let (status, body) = post_json(&app, &format!("/api/sessions/{idle}/reset"), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "UNKNOWN_SESSION");
    let (status, _) = post_json(&app, &format!("/api/sessions/{busy}/reset"), json!({})).await;
    assert_eq!(status, StatusCode::OK);

    // The evicted session's directory goes away once its cleanup task runs.
    let mut remaining = usize::MAX;
    for _ in 0..50 {
        remaining = std::fs::read_dir(root.path()).unwrap().count();
        if remaining == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(remaining, 1);
}

#[tokio::test]
async fn test_idle_sweeper_runs_in_background() {
    let (_root, state, app) = app_with_ttl(std::time::Duration::from_millis(50));
    open_session(&app).await;
    let sweeper = rockit::server::spawn_idle_sweeper(state.clone());
    let mut open = 1;
    for _ in 0..100 {
        open = state.session_count().await;
        if open == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    sweeper.abort();
    assert_eq!(open, 0);
}
