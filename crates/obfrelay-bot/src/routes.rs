//! HTTP endpoints: liveness and the Telegram webhook.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::telegram::Update;

/// Header Telegram echoes back when the webhook was registered with a secret.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Decoded updates go to the dispatcher through this channel.
    pub updates: mpsc::Sender<Update>,
    pub webhook_secret: Option<Arc<str>>,
    /// Body of `GET /`.
    pub banner: Arc<str>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/webhook", post(webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /`: liveness.
pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.banner.to_string(),
    )
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, "Bad request").into_response()
}

/// `POST /webhook`: accept one update from Telegram.
pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !is_json(&headers) {
        return bad_request();
    }

    if let Some(secret) = &state.webhook_secret {
        let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if presented != Some(secret.as_ref()) {
            warn!("Webhook call with missing or wrong secret token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "Undecodable webhook body");
            return bad_request();
        }
    };

    if state.updates.send(update).await.is_err() {
        // Telegram retries on non-2xx, so the update is not lost.
        warn!("Dispatcher unavailable, refusing update");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    StatusCode::OK.into_response()
}
