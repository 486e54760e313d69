//! Application context and the two long-running tasks.
//!
//! One [`AppContext`] is built at startup. It hands the relay to the
//! dispatcher and a channel sender to the HTTP server; the two tasks share
//! nothing else.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::info;

use obfrelay_core::{Config, FileProcessingRelay};

use crate::dispatch::Dispatcher;
use crate::polling::run_polling;
use crate::routes::{AppState, build_router};
use crate::telegram::{TelegramClient, Update};

/// Capacity of the update channel between the sources and the dispatcher.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Where updates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSource {
    /// `getUpdates` long polling.
    Polling,
    /// Telegram pushes to `POST /webhook` at this public URL.
    Webhook { url: String },
}

impl UpdateSource {
    /// Webhook mode for a public hostname.
    pub fn webhook_for_host(hostname: &str) -> Self {
        Self::Webhook {
            url: webhook_url(hostname),
        }
    }
}

/// `https://<hostname>/webhook`.
pub fn webhook_url(hostname: &str) -> String {
    let host = hostname
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!("https://{host}/webhook")
}

/// Everything the running process needs, built once.
pub struct AppContext {
    pub config: Config,
    pub client: Arc<TelegramClient>,
    pub relay: Arc<FileProcessingRelay>,
    pub source: UpdateSource,
    pub webhook_secret: Option<String>,
}

impl AppContext {
    pub fn new(
        config: Config,
        client: Arc<TelegramClient>,
        source: UpdateSource,
        webhook_secret: Option<String>,
    ) -> Self {
        let relay = Arc::new(FileProcessingRelay::new(
            Arc::clone(&client) as Arc<dyn obfrelay_core::MessagingGateway>,
            config.relay.clone(),
        ));
        Self {
            config,
            client,
            relay,
            source,
            webhook_secret,
        }
    }

    /// HTTP handler state feeding `updates`.
    pub fn router_state(&self, updates: mpsc::Sender<Update>) -> AppState {
        AppState {
            updates,
            webhook_secret: self.webhook_secret.as_deref().map(Arc::from),
            banner: Arc::from(format!(
                "Telegram {} Bot is running!",
                self.config.relay.tool_label
            )),
        }
    }

    /// Serve until `shutdown` flips to `true` or a task fails.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);

        let router = build_router(self.router_state(updates_tx.clone()));
        let listener = tokio::net::TcpListener::bind(self.config.server.listen_addr)
            .await
            .with_context(|| format!("binding {}", self.config.server.listen_addr))?;
        info!(addr = %self.config.server.listen_addr, "HTTP server listening");

        let mut http_shutdown = shutdown.clone();
        let http = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_requested(&mut http_shutdown).await;
                })
                .await
        });

        let poller = match &self.source {
            UpdateSource::Polling => Some(tokio::spawn(run_polling(
                Arc::clone(&self.client),
                updates_tx,
                self.config.server.poll_timeout_secs,
                shutdown.clone(),
            ))),
            UpdateSource::Webhook { url } => {
                self.client
                    .delete_webhook()
                    .await
                    .context("removing previous webhook")?;
                self.client
                    .set_webhook(url, self.webhook_secret.as_deref())
                    .await
                    .context("registering webhook")?;
                info!(url = %url, "Webhook set up");
                drop(updates_tx);
                None
            }
        };

        let dispatcher = tokio::spawn(Dispatcher::new(Arc::clone(&self.relay)).run(updates_rx));

        tokio::select! {
            result = http => {
                result.context("HTTP server task panicked")?.context("HTTP server failed")?;
            }
            () = shutdown_requested(&mut shutdown) => {
                info!("Shutting down");
            }
        }

        if let Some(poller) = poller {
            poller.abort();
        }
        dispatcher.abort();
        Ok(())
    }
}

/// Resolves once `shutdown` reads `true` or its sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
