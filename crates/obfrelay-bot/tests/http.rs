#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! HTTP endpoint behaviour, driven through the router with `oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::sync::mpsc;
use tower::ServiceExt;

use obfrelay_bot::routes::{AppState, SECRET_HEADER, build_router};
use obfrelay_bot::telegram::Update;

const UPDATE_JSON: &str = r#"{"update_id": 31, "message": {"message_id": 4, "chat": {"id": 8}, "text": "/start"}}"#;

fn app(secret: Option<&str>) -> (axum::Router, mpsc::Receiver<Update>) {
    let (tx, rx) = mpsc::channel(4);
    let router = build_router(AppState {
        updates: tx,
        webhook_secret: secret.map(Arc::from),
        banner: Arc::from("Telegram PyArmor Bot is running!"),
    });
    (router, rx)
}

/// Send a request to the app and return (status, body text).
async fn send(router: axum::Router, request: Request<Body>) -> (StatusCode, String) {
    let resp = router.oneshot(request).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

fn post_webhook(content_type: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/webhook");
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn root_reports_liveness() {
    let (router, _rx) = app(None);
    let (status, text) = send(router, Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Telegram PyArmor Bot is running!");
}

#[tokio::test]
async fn root_is_ok_even_when_dispatcher_is_gone() {
    let (router, rx) = app(None);
    drop(rx);
    let (status, _) = send(router, Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn webhook_forwards_json_update() {
    let (router, mut rx) = app(None);
    let (status, text) = send(router, post_webhook(Some("application/json"), UPDATE_JSON)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.is_empty());

    let update = rx.try_recv().unwrap();
    assert_eq!(update.update_id, 31);
}

#[tokio::test]
async fn webhook_rejects_non_json_content_type() {
    for content_type in [Some("text/plain"), Some("application/x-www-form-urlencoded"), None] {
        let (router, mut rx) = app(None);
        let (status, text) = send(router, post_webhook(content_type, UPDATE_JSON)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{content_type:?}");
        assert_eq!(text, "Bad request");
        assert!(rx.try_recv().is_err(), "nothing should be forwarded");
    }
}

#[tokio::test]
async fn webhook_rejects_malformed_json() {
    let (router, mut rx) = app(None);
    let (status, _) = send(router, post_webhook(Some("application/json"), "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn webhook_secret_is_enforced() {
    let (router, mut rx) = app(Some("s3cret"));
    let (status, _) = send(router, post_webhook(Some("application/json"), UPDATE_JSON)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(rx.try_recv().is_err());

    let (router, mut rx) = app(Some("s3cret"));
    let mut request = post_webhook(Some("application/json"), UPDATE_JSON);
    request
        .headers_mut()
        .insert(SECRET_HEADER, "s3cret".parse().unwrap());
    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rx.try_recv().unwrap().update_id, 31);
}

#[tokio::test]
async fn webhook_without_dispatcher_is_unavailable() {
    let (router, rx) = app(None);
    drop(rx);
    let (status, _) = send(router, post_webhook(Some("application/json"), UPDATE_JSON)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
