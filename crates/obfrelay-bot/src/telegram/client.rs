//! Telegram Bot API client.
//!
//! Every method is a JSON `POST` to `<api_base>/bot<token>/<method>`, except
//! file downloads (`GET <api_base>/file/bot<token>/<file_path>`) and
//! `sendDocument` (multipart).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use obfrelay_core::{ChatRef, GatewayError, MessagingGateway};

use super::types::{ApiResponse, File, Update};

/// Public Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Slack added on top of the long-poll timeout for the HTTP request itself.
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Reply to `message_id`, still delivering if it was deleted meanwhile.
fn reply_parameters(message_id: i64) -> serde_json::Value {
    json!({ "message_id": message_id, "allow_sending_without_reply": true })
}

/// Telegram client errors.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Telegram API error ({code}): {description}")]
    Api { code: i64, description: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs embed the bot token.
        Self::Http(e.without_url())
    }
}

impl From<TelegramError> for GatewayError {
    fn from(e: TelegramError) -> Self {
        match e {
            TelegramError::Api { .. } => Self::Rejected(e.to_string()),
            _ => Self::Transport(e.to_string()),
        }
    }
}

/// Telegram Bot API client.
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    /// Create a client for `token` against `api_base`.
    pub fn new(token: &str, api_base: &str) -> Result<Self, TelegramError> {
        if token.is_empty() {
            return Err(TelegramError::Config("bot token is empty".into()));
        }
        if api_base.is_empty() {
            return Err(TelegramError::Config("api base URL is empty".into()));
        }

        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub(crate) fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    pub(crate) fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.api_base,
            self.token,
            file_path.trim_start_matches('/')
        )
    }

    /// Decode the `{ok, result}` envelope.
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, TelegramError> {
        let status = resp.status();
        let envelope: ApiResponse<T> = match resp.json().await {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => return Err(TelegramError::Decode(e.to_string())),
            Err(_) => {
                return Err(TelegramError::Api {
                    code: i64::from(status.as_u16()),
                    description: status.canonical_reason().unwrap_or("Unknown").into(),
                });
            }
        };
        if !envelope.ok {
            return Err(TelegramError::Api {
                code: envelope
                    .error_code
                    .unwrap_or_else(|| i64::from(status.as_u16())),
                description: envelope.description.unwrap_or_default(),
            });
        }
        envelope
            .result
            .ok_or_else(|| TelegramError::Decode("response has no result".into()))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &impl Serialize,
    ) -> Result<T, TelegramError> {
        debug!(method, "Bot API call");
        let resp = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        let resp = self
            .http
            .post(self.method_url("getUpdates"))
            .timeout(Duration::from_secs(timeout_secs) + POLL_GRACE)
            .json(&body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// Register `url` as the webhook.
    pub async fn set_webhook(
        &self,
        url: &str,
        secret_token: Option<&str>,
    ) -> Result<(), TelegramError> {
        let mut body = json!({ "url": url, "allowed_updates": ["message"] });
        if let Some(secret) = secret_token {
            body["secret_token"] = json!(secret);
        }
        let _: bool = self.call("setWebhook", &body).await?;
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        let _: bool = self.call("deleteWebhook", &json!({})).await?;
        Ok(())
    }

    pub async fn send_message(&self, chat: ChatRef, text: &str) -> Result<(), TelegramError> {
        let mut body = json!({ "chat_id": chat.chat_id, "text": text });
        if let Some(message_id) = chat.message_id {
            body["reply_parameters"] = reply_parameters(message_id);
        }
        let _: serde_json::Value = self.call("sendMessage", &body).await?;
        Ok(())
    }

    pub async fn get_file(&self, file_id: &str) -> Result<File, TelegramError> {
        self.call("getFile", &json!({ "file_id": file_id })).await
    }

    /// Download a file by the `file_path` returned from `getFile`.
    pub async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, TelegramError> {
        let resp = self.http.get(self.file_url(file_path)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TelegramError::Api {
                code: i64::from(status.as_u16()),
                description: format!(
                    "file download failed: {}",
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn send_document(
        &self,
        chat: ChatRef,
        file_name: &str,
        contents: Vec<u8>,
        caption: &str,
    ) -> Result<(), TelegramError> {
        let mut form = Form::new()
            .text("chat_id", chat.chat_id.to_string())
            .text("caption", caption.to_string())
            .part(
                "document",
                Part::bytes(contents).file_name(file_name.to_string()),
            );
        if let Some(message_id) = chat.message_id {
            form = form.text("reply_parameters", reply_parameters(message_id).to_string());
        }
        debug!(method = "sendDocument", file_name, "Bot API call");
        let resp = self
            .http
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;
        let _: serde_json::Value = Self::decode(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl MessagingGateway for TelegramClient {
    async fn reply_text(&self, chat: ChatRef, text: &str) -> Result<(), GatewayError> {
        Ok(self.send_message(chat, text).await?)
    }

    async fn send_document(
        &self,
        chat: ChatRef,
        file_name: &str,
        contents: Vec<u8>,
        caption: &str,
    ) -> Result<(), GatewayError> {
        Ok(Self::send_document(self, chat, file_name, contents, caption).await?)
    }

    async fn fetch_file(&self, file_id: &str) -> Result<Vec<u8>, GatewayError> {
        let file = self.get_file(file_id).await?;
        let file_path = file.file_path.ok_or_else(|| {
            TelegramError::Decode(format!("file {file_id} has no download path"))
        })?;
        Ok(self.download_file(&file_path).await?)
    }
}
