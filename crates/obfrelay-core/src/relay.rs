//! The file processing workflow.
//!
//! upload → stage under the user's workspace → run the transformer → return
//! the output → remove the workspace. Every outcome, including failures,
//! ends with the workspace removed and a reply sent.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::gateway::{ChatRef, GatewayError, IncomingDocument, MessagingGateway, UploadRequest};
use crate::transformer::{TransformError, Transformer};
use crate::workspace::{self, WorkspaceDir, WorkspaceError, Workspaces};

/// Acknowledgement sent once the upload is staged.
pub const ACK_TEXT: &str = "File received. Obfuscating...";

/// Reply for a successful transform that left nothing to return.
pub const OUTPUT_NOT_FOUND_TEXT: &str = "Obfuscation failed - couldn't find output file.";

/// Caption prefix for the returned document.
pub const CAPTION_PREFIX: &str = "Obfuscated: ";

/// Why a request did not produce a document.
#[derive(Debug, Error)]
pub enum RelayFailure {
    #[error("unsupported file: {0}")]
    InvalidInputKind(String),

    #[error(transparent)]
    Transformer(#[from] TransformError),

    #[error("transformer output not found")]
    OutputNotFound,

    #[error("{0}")]
    Unclassified(String),
}

impl From<std::io::Error> for RelayFailure {
    fn from(e: std::io::Error) -> Self {
        Self::Unclassified(e.to_string())
    }
}

impl From<WorkspaceError> for RelayFailure {
    fn from(e: WorkspaceError) -> Self {
        Self::Unclassified(e.to_string())
    }
}

impl From<GatewayError> for RelayFailure {
    fn from(e: GatewayError) -> Self {
        Self::Unclassified(e.to_string())
    }
}

/// Accepts uploads and relays them through the external transformer.
pub struct FileProcessingRelay {
    gateway: Arc<dyn MessagingGateway>,
    transformer: Transformer,
    workspaces: Workspaces,
    config: RelayConfig,
}

impl FileProcessingRelay {
    pub fn new(gateway: Arc<dyn MessagingGateway>, config: RelayConfig) -> Self {
        let transformer = Transformer::new(config.tool.clone())
            .with_leading_args(config.tool_args.clone())
            .with_timeout(config.transform_timeout());
        Self {
            gateway,
            transformer,
            workspaces: Workspaces::new(config.temp_root.clone()),
            config,
        }
    }

    pub const fn workspaces(&self) -> &Workspaces {
        &self.workspaces
    }

    /// Whether `name` carries the required source extension.
    pub fn validate_upload(&self, name: &str) -> bool {
        name.ends_with(&self.config.source_extension)
    }

    pub fn welcome_text(&self) -> String {
        format!(
            "Send me a {} file and I'll obfuscate it using {}.",
            self.config.source_extension, self.config.tool_label
        )
    }

    pub fn rejection_text(&self) -> String {
        format!("Please send a {} file only.", self.config.source_extension)
    }

    /// User-visible text for a failure.
    pub fn failure_text(&self, failure: &RelayFailure) -> String {
        match failure {
            RelayFailure::InvalidInputKind(_) => self.rejection_text(),
            RelayFailure::Transformer(e) => format!("{} error: {e}", self.config.tool_label),
            RelayFailure::OutputNotFound => OUTPUT_NOT_FOUND_TEXT.to_string(),
            RelayFailure::Unclassified(msg) => format!("Error: {msg}"),
        }
    }

    /// Reply to a start command.
    pub async fn welcome(&self, chat: ChatRef) -> Result<(), GatewayError> {
        self.gateway.reply_text(chat, &self.welcome_text()).await
    }

    /// Validate, fetch and handle an inbound document.
    ///
    /// Returns the name of the file sent back to the user.
    pub async fn process_document(&self, doc: IncomingDocument) -> Result<String, RelayFailure> {
        if !self.validate_upload(&doc.file_name) {
            return self.reject(doc.chat, &doc.file_name).await;
        }

        let file_bytes = match self.gateway.fetch_file(&doc.file_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(user_id = %doc.user_id, file_id = %doc.file_id, error = %e, "Failed to fetch upload");
                let failure = RelayFailure::from(e);
                self.report(doc.chat, &failure).await;
                return Err(failure);
            }
        };

        self.handle(
            doc.chat,
            UploadRequest {
                user_id: doc.user_id,
                file_name: doc.file_name,
                file_bytes,
            },
        )
        .await
    }

    /// Run one upload through the transformer and reply with the result.
    ///
    /// The user's workspace is locked for the whole call and removed before
    /// it returns, whatever the outcome.
    pub async fn handle(
        &self,
        chat: ChatRef,
        request: UploadRequest,
    ) -> Result<String, RelayFailure> {
        if !self.validate_upload(&request.file_name) {
            return self.reject(chat, &request.file_name).await;
        }

        let _lock = self.workspaces.lock(&request.user_id).await;
        info!(
            user_id = %request.user_id,
            file_name = %request.file_name,
            size = request.file_bytes.len(),
            "Handling upload"
        );

        let result = match self.workspaces.create(&request.user_id).await {
            Ok(workspace) => {
                let result = self.transform_in(&workspace, chat, &request).await;
                if let Err(e) = workspace.remove().await {
                    warn!(user_id = %request.user_id, error = %e, "Workspace cleanup failed");
                }
                result
            }
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(output) => info!(user_id = %request.user_id, output = %output, "Upload relayed"),
            Err(failure) => {
                warn!(user_id = %request.user_id, error = %failure, "Upload failed");
                self.report(chat, failure).await;
            }
        }
        result
    }

    async fn transform_in(
        &self,
        workspace: &WorkspaceDir,
        chat: ChatRef,
        request: &UploadRequest,
    ) -> Result<String, RelayFailure> {
        let input = workspace.input_path(&request.file_name)?;
        tokio::fs::write(&input, &request.file_bytes).await?;

        if let Err(e) = self.gateway.reply_text(chat, ACK_TEXT).await {
            debug!(error = %e, "Acknowledgement not delivered");
        }

        let output_dir = workspace.output_dir();
        self.transformer.run(&input, &output_dir).await?;

        let found = workspace::find_output(&output_dir, &self.config.output_extension)
            .await?
            .ok_or(RelayFailure::OutputNotFound)?;
        let contents = tokio::fs::read(&found).await?;
        let output_name = output_file_name(&found, &request.file_name);
        let caption = format!("{CAPTION_PREFIX}{}", request.file_name);

        self.gateway
            .send_document(chat, &output_name, contents, &caption)
            .await?;
        Ok(output_name)
    }

    async fn reject(&self, chat: ChatRef, file_name: &str) -> Result<String, RelayFailure> {
        debug!(file_name, "Rejecting upload with unsupported extension");
        let failure = RelayFailure::InvalidInputKind(file_name.to_string());
        self.report(chat, &failure).await;
        Err(failure)
    }

    /// Best-effort failure reply.
    async fn report(&self, chat: ChatRef, failure: &RelayFailure) {
        let text = self.failure_text(failure);
        if let Err(e) = self.gateway.reply_text(chat, &text).await {
            warn!(chat_id = chat.chat_id, error = %e, "Failed to deliver failure reply");
        }
    }
}

fn output_file_name(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map_or_else(|| fallback.to_string(), |n| n.to_string_lossy().into_owned())
}
