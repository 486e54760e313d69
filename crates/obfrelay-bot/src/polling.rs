//! Long-polling update source for local development.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::telegram::{TelegramClient, Update};

/// Initial delay after a failed poll; doubles up to [`MAX_BACKOFF`].
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Poll `getUpdates` and forward every update to `updates`.
///
/// Returns when `shutdown` flips to `true` or the receiver is dropped.
pub async fn run_polling(
    client: Arc<TelegramClient>,
    updates: mpsc::Sender<Update>,
    poll_timeout_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    // getUpdates is refused while a webhook is registered.
    if let Err(e) = client.delete_webhook().await {
        warn!(error = %e, "Failed to remove webhook before polling");
    }
    info!("Starting polling");

    let mut offset: Option<i64> = None;
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let batch = tokio::select! {
            _ = shutdown.changed() => break,
            result = client.get_updates(offset, poll_timeout_secs) => result,
        };

        match batch {
            Ok(batch) => {
                backoff = INITIAL_BACKOFF;
                for update in batch {
                    offset = Some(update.update_id + 1);
                    if updates.send(update).await.is_err() {
                        info!("Dispatcher gone, polling stopped");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?backoff, "getUpdates failed");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
    info!("Polling stopped");
}
