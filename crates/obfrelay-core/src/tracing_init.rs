//! Tracing setup for the `obfrelay` binary.
//!
//! [`default_filter`] builds the `RUST_LOG` fallback so the binary, the bot
//! library and this crate all log at the configured level; [`init_tracing`]
//! installs the subscriber with that filter in text or JSON form.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- directives used when `RUST_LOG` is unset or invalid
///   (e.g. `"obfrelay=info,obfrelay_bot=info,obfrelay_core=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    // A malformed RUST_LOG falls back to the default rather than disabling logs.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Build the default filter directive: `level` for each of `targets` plus the core crate.
pub fn default_filter(targets: &[&str], level: &str) -> String {
    targets
        .iter()
        .chain(std::iter::once(&"obfrelay_core"))
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_core_crate() {
        assert_eq!(
            default_filter(&["obfrelay", "obfrelay_bot"], "debug"),
            "obfrelay=debug,obfrelay_bot=debug,obfrelay_core=debug"
        );
        assert_eq!(default_filter(&[], "warn"), "obfrelay_core=warn");
    }
}
