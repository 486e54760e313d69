//! Update dispatcher.
//!
//! Receives decoded updates (from long polling or the webhook) on a channel
//! and handles each on its own task, so a slow transform never stalls the
//! update source and a failing one never takes the loop down.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use obfrelay_core::{ChatRef, FileProcessingRelay, IncomingDocument};

use crate::telegram::Update;

/// What an update asks the relay to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `/start` command.
    Start(ChatRef),
    /// An uploaded document.
    Document(IncomingDocument),
    /// Anything else.
    Ignored,
}

/// Classify an update.
pub fn classify(update: &Update) -> Inbound {
    let Some(message) = &update.message else {
        return Inbound::Ignored;
    };
    let chat = ChatRef::new(message.chat.id, Some(message.message_id));

    if let Some(document) = &message.document {
        // Channel posts carry no sender; fall back to the chat.
        let user_id = message
            .from
            .as_ref()
            .map_or(message.chat.id, |user| user.id);
        return Inbound::Document(IncomingDocument {
            chat,
            user_id: user_id.to_string(),
            file_name: document.file_name.clone().unwrap_or_default(),
            file_id: document.file_id.clone(),
        });
    }

    match message.command() {
        Some("start") => Inbound::Start(chat),
        _ => Inbound::Ignored,
    }
}

/// Handle a single update to completion.
pub async fn dispatch(relay: &FileProcessingRelay, update: Update) {
    let update_id = update.update_id;
    match classify(&update) {
        Inbound::Start(chat) => {
            if let Err(e) = relay.welcome(chat).await {
                warn!(update_id, error = %e, "Failed to send welcome");
            }
        }
        Inbound::Document(doc) => {
            // Failures are reported to the user and logged by the relay.
            let _ = relay.process_document(doc).await;
        }
        Inbound::Ignored => debug!(update_id, "Ignoring update"),
    }
}

/// Spawns one task per received update.
pub struct Dispatcher {
    relay: Arc<FileProcessingRelay>,
}

impl Dispatcher {
    pub const fn new(relay: Arc<FileProcessingRelay>) -> Self {
        Self { relay }
    }

    /// Run until every sender of `updates` is dropped.
    pub async fn run(self, mut updates: mpsc::Receiver<Update>) {
        info!("Dispatcher started");
        while let Some(update) = updates.recv().await {
            let relay = Arc::clone(&self.relay);
            tokio::spawn(async move {
                dispatch(&relay, update).await;
            });
        }
        info!("Update channel closed, dispatcher stopping");
    }
}
