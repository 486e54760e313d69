//! Messaging gateway seam.
//!
//! The relay talks to the chat transport only through [`MessagingGateway`],
//! so the workflow can run against Telegram in production and a recording
//! fake in tests.

use async_trait::async_trait;
use thiserror::Error;

/// Where replies for one inbound message are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatRef {
    pub chat_id: i64,
    /// Message being replied to, if any.
    pub message_id: Option<i64>,
}

impl ChatRef {
    pub const fn new(chat_id: i64, message_id: Option<i64>) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

/// An uploaded file whose contents have already been fetched.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Opaque sender identifier; names the workspace directory.
    pub user_id: String,
    pub file_name: String,
    pub file_bytes: Vec<u8>,
}

/// An inbound document event, before its contents are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingDocument {
    pub chat: ChatRef,
    pub user_id: String,
    pub file_name: String,
    /// Gateway-specific handle used to fetch the contents.
    pub file_id: String,
}

/// Errors surfaced by a gateway implementation.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Outbound (and file retrieval) operations of the chat transport.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Reply with plain text.
    async fn reply_text(&self, chat: ChatRef, text: &str) -> Result<(), GatewayError>;

    /// Send a file as a document attachment.
    async fn send_document(
        &self,
        chat: ChatRef,
        file_name: &str,
        contents: Vec<u8>,
        caption: &str,
    ) -> Result<(), GatewayError>;

    /// Fetch the contents of an uploaded file.
    async fn fetch_file(&self, file_id: &str) -> Result<Vec<u8>, GatewayError>;
}
