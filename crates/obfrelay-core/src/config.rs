//! Configuration resolution for obfrelay.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. Settings file (`--config <path>`, JSON)
//! 3. Environment variables / CLI arguments, applied by the binary

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete obfrelay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Settings for the file processing workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Root under which per-user workspaces are created.
    pub temp_root: PathBuf,
    /// External transformer executable.
    pub tool: PathBuf,
    /// Arguments placed before `gen` (e.g. `["-m", "pyarmor.cli"]` when `tool` is python).
    pub tool_args: Vec<String>,
    /// Human-readable tool name used in replies.
    pub tool_label: String,
    /// Extension an upload must carry to be accepted.
    pub source_extension: String,
    /// Extension of the file returned to the user.
    pub output_extension: String,
    /// Subprocess timeout in seconds; `0` waits forever.
    pub transform_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            temp_root: PathBuf::from("temp"),
            tool: PathBuf::from("pyarmor"),
            tool_args: Vec::new(),
            tool_label: "PyArmor".to_string(),
            source_extension: ".py".to_string(),
            output_extension: ".py".to_string(),
            transform_timeout_secs: 300,
        }
    }
}

impl RelayConfig {
    /// Subprocess timeout, or `None` when disabled.
    pub const fn transform_timeout(&self) -> Option<Duration> {
        if self.transform_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.transform_timeout_secs))
        }
    }
}

/// HTTP server and gateway polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Long-poll timeout passed to the gateway (seconds).
    pub poll_timeout_secs: u64,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            poll_timeout_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Check invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<()> {
        let relay = &self.relay;
        if relay.tool.as_os_str().is_empty() {
            return Err(Error::Config("relay.tool cannot be empty".into()));
        }
        if relay.temp_root.as_os_str().is_empty() {
            return Err(Error::Config("relay.temp_root cannot be empty".into()));
        }
        for (field, ext) in [
            ("relay.source_extension", &relay.source_extension),
            ("relay.output_extension", &relay.output_extension),
        ] {
            if ext.len() < 2 || !ext.starts_with('.') {
                return Err(Error::Config(format!(
                    "{field} must look like \".ext\", got {ext:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Load configuration from defaults and an optional settings file.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => load_config_file(path)?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pyarmor_layout() {
        let config = Config::default();
        assert_eq!(config.relay.temp_root, PathBuf::from("temp"));
        assert_eq!(config.relay.tool, PathBuf::from("pyarmor"));
        assert_eq!(config.relay.source_extension, ".py");
        assert_eq!(config.server.listen_addr.port(), 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeout_disables_limit() {
        let relay = RelayConfig {
            transform_timeout_secs: 0,
            ..RelayConfig::default()
        };
        assert_eq!(relay.transform_timeout(), None);
        assert_eq!(
            RelayConfig::default().transform_timeout(),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"relay": {"tool": "/opt/pyarmor/bin/pyarmor"}}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.relay.tool, PathBuf::from("/opt/pyarmor/bin/pyarmor"));
        assert_eq!(config.relay.tool_label, "PyArmor");
        assert_eq!(config.server.poll_timeout_secs, 30);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load_config(Some(Path::new("/nonexistent/obfrelay.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn extension_without_dot_rejected() {
        let mut config = Config::default();
        config.relay.source_extension = "py".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("relay.source_extension"));
    }

    #[test]
    fn empty_tool_rejected() {
        let mut config = Config::default();
        config.relay.tool = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
