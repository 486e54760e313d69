#![cfg(unix)]
#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Webhook → dispatcher → relay → Bot API, against a mock Telegram.
//!
//! The obfuscator is `sh -c <script>`; the Bot API is wiremock.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tokio::sync::mpsc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use obfrelay_bot::dispatch::Dispatcher;
use obfrelay_bot::routes::build_router;
use obfrelay_bot::telegram::TelegramClient;
use obfrelay_bot::{AppContext, UpdateSource};
use obfrelay_core::{Config, RelayConfig};

fn ok(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": result }))
}

async fn mock_telegram() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botT:1/getFile"))
        .respond_with(ok(json!({ "file_id": "DOC1", "file_path": "documents/file_9.py" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file/botT:1/documents/file_9.py"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"print('secret')\n".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/botT:1/sendMessage"))
        .respond_with(ok(json!({ "message_id": 100, "chat": { "id": 555 } })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/botT:1/sendDocument"))
        .respond_with(ok(json!({ "message_id": 101, "chat": { "id": 555 } })))
        .mount(&server)
        .await;
    server
}

fn context(server: &MockServer, temp_root: &std::path::Path, script: &str) -> AppContext {
    let config = Config {
        relay: RelayConfig {
            temp_root: temp_root.to_path_buf(),
            tool: "sh".into(),
            tool_args: vec!["-c".into(), script.into(), "stub".into()],
            transform_timeout_secs: 10,
            ..RelayConfig::default()
        },
        ..Config::default()
    };
    let client = Arc::new(TelegramClient::new("T:1", &server.uri()).unwrap());
    AppContext::new(config, client, UpdateSource::Polling, None)
}

fn document_update(file_name: &str) -> String {
    json!({
        "update_id": 77,
        "message": {
            "message_id": 12,
            "from": { "id": 555, "is_bot": false, "first_name": "U" },
            "chat": { "id": 555, "type": "private" },
            "document": { "file_id": "DOC1", "file_unique_id": "u", "file_name": file_name }
        }
    })
    .to_string()
}

/// Poll the mock until `count` requests hit a path ending in `suffix`.
async fn wait_for_calls(server: &MockServer, suffix: &str, count: usize) -> Vec<wiremock::Request> {
    for _ in 0..100 {
        let calls: Vec<_> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path().ends_with(suffix))
            .collect();
        if calls.len() >= count {
            return calls;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {count} call(s) to {suffix}");
}

async fn post_update(router: axum::Router, body: String) -> StatusCode {
    router
        .oneshot(
            Request::post("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn uploaded_file_comes_back_obfuscated() {
    let server = mock_telegram().await;
    let temp = tempfile::TempDir::new().unwrap();
    let ctx = context(
        &server,
        temp.path(),
        r#"mkdir -p "$3" && { echo '# armored'; cat "$4"; } > "$3/$(basename "$4")""#,
    );

    let (tx, rx) = mpsc::channel(8);
    let router = build_router(ctx.router_state(tx));
    let dispatcher = tokio::spawn(Dispatcher::new(Arc::clone(&ctx.relay)).run(rx));

    assert_eq!(post_update(router, document_update("job.py")).await, StatusCode::OK);

    let docs = wait_for_calls(&server, "/sendDocument", 1).await;
    let body = String::from_utf8_lossy(&docs[0].body);
    assert!(body.contains("Obfuscated: job.py"));
    assert!(body.contains("# armored\nprint('secret')"));

    // Workspace is removed before the relay returns, just after sendDocument.
    for _ in 0..40 {
        if !temp.path().join("555").exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(!temp.path().join("555").exists());

    let acks = wait_for_calls(&server, "/sendMessage", 1).await;
    assert!(String::from_utf8_lossy(&acks[0].body).contains("File received. Obfuscating..."));

    dispatcher.abort();
}

#[tokio::test]
async fn wrong_extension_gets_rejection_without_download() {
    let server = mock_telegram().await;
    let temp = tempfile::TempDir::new().unwrap();
    let ctx = context(&server, temp.path(), "exit 0");

    let (tx, rx) = mpsc::channel(8);
    let router = build_router(ctx.router_state(tx));
    let dispatcher = tokio::spawn(Dispatcher::new(Arc::clone(&ctx.relay)).run(rx));

    assert_eq!(post_update(router, document_update("photo.png")).await, StatusCode::OK);

    let replies = wait_for_calls(&server, "/sendMessage", 1).await;
    assert!(String::from_utf8_lossy(&replies[0].body).contains("Please send a .py file only."));

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.url.path().ends_with("/getFile")));
    assert!(std::fs::read_dir(temp.path()).unwrap().next().is_none());

    dispatcher.abort();
}

#[tokio::test]
async fn start_command_gets_welcome() {
    let server = mock_telegram().await;
    let temp = tempfile::TempDir::new().unwrap();
    let ctx = context(&server, temp.path(), "exit 0");

    let (tx, rx) = mpsc::channel(8);
    let router = build_router(ctx.router_state(tx));
    let dispatcher = tokio::spawn(Dispatcher::new(Arc::clone(&ctx.relay)).run(rx));

    let update = json!({
        "update_id": 1,
        "message": { "message_id": 2, "chat": { "id": 555 }, "text": "/start" }
    });
    assert_eq!(post_update(router, update.to_string()).await, StatusCode::OK);

    let replies = wait_for_calls(&server, "/sendMessage", 1).await;
    let body: serde_json::Value = serde_json::from_slice(&replies[0].body).unwrap();
    assert_eq!(
        body["text"],
        "Send me a .py file and I'll obfuscate it using PyArmor."
    );
    assert_eq!(body["reply_parameters"]["message_id"], 2);

    dispatcher.abort();
}
