//! obfrelay
//!
//! Telegram bot that obfuscates uploaded Python files with an external tool
//! and sends the result back.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap::builder::FalseyValueParser;
use tracing::info;

use obfrelay_bot::telegram::{TelegramClient, DEFAULT_API_BASE};
use obfrelay_bot::{AppContext, UpdateSource};
use obfrelay_core::config::load_config;
use obfrelay_core::tracing_init::{default_filter, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "obfrelay")]
#[command(version, about = "Telegram relay for a command-line obfuscator")]
struct Args {
    /// Telegram bot token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    bot_token: String,

    /// JSON settings file
    #[arg(long, env = "OBFRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address (default 0.0.0.0:3000)
    #[arg(long, env = "OBFRELAY_ADDR")]
    addr: Option<SocketAddr>,

    /// Hosted mode: receive updates through the webhook instead of polling
    #[arg(long, env = "RENDER", value_parser = hosted_mode_parser())]
    webhook: bool,

    /// Public hostname used to build the webhook URL (`https://<host>/webhook`)
    #[arg(long, env = "RENDER_EXTERNAL_HOSTNAME")]
    external_hostname: Option<String>,

    /// Secret Telegram must echo in `X-Telegram-Bot-Api-Secret-Token`
    #[arg(long, env = "OBFRELAY_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Bot API base URL
    #[arg(long, default_value = DEFAULT_API_BASE, env = "TELEGRAM_API_URL")]
    api_url: String,

    /// Path to the obfuscator executable
    #[arg(long, env = "OBFRELAY_TOOL")]
    tool: Option<PathBuf>,

    /// Root directory for per-user workspaces
    #[arg(long, env = "OBFRELAY_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Seconds before a running obfuscator is killed (0 = never)
    #[arg(long, env = "OBFRELAY_TRANSFORM_TIMEOUT")]
    transform_timeout: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, env = "OBFRELAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "OBFRELAY_LOG_JSON")]
    log_json: bool,
}

/// `RENDER` is set to arbitrary non-empty values by hosting platforms, so any
/// value other than an explicit false-like one enables hosted mode.
fn hosted_mode_parser() -> FalseyValueParser {
    FalseyValueParser::new()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.listen_addr = addr;
    }
    if let Some(tool) = args.tool {
        config.relay.tool = tool;
    }
    if let Some(dir) = args.temp_dir {
        config.relay.temp_root = dir;
    }
    if let Some(secs) = args.transform_timeout {
        config.relay.transform_timeout_secs = secs;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    config.validate()?;

    init_tracing(
        &default_filter(&["obfrelay", "obfrelay_bot"], &config.server.log_level),
        args.log_json,
    );

    let source = if args.webhook {
        let Some(host) = args.external_hostname.as_deref() else {
            anyhow::bail!("webhook mode requires RENDER_EXTERNAL_HOSTNAME / --external-hostname");
        };
        UpdateSource::webhook_for_host(host)
    } else {
        UpdateSource::Polling
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.listen_addr,
        tool = %config.relay.tool.display(),
        webhook = args.webhook,
        "Starting obfrelay"
    );

    let client = Arc::new(TelegramClient::new(&args.bot_token, &args.api_url)?);
    let ctx = AppContext::new(config, client, source, args.webhook_secret);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let app = ctx.run(shutdown_rx);
    tokio::pin!(app);

    tokio::select! {
        result = &mut app => return result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    app.await?;
    info!("obfrelay stopped");
    Ok(())
}
