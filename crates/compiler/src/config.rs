//! Backend configuration and logging setup

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable naming a JSON configuration file
pub const CONFIG_ENV: &str = "ONNX_XLA_CONFIG";

/// Environment variable holding the log filter; `RUST_LOG` is the fallback
pub const LOG_ENV: &str = "ONNX_XLA_LOG";

/// Backend identity and limits reported through backend info queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub device: String,
    /// Largest model, in bytes, a graph may be initialized from
    pub max_graph_size: u64,
    /// Graphs that may be initialized on one backend at a time
    pub max_graph_count: u64,
    /// `tracing` filter directive, e.g. `onnx_xla_compiler=debug`
    pub log_filter: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: "onnx-xla".to_string(),
            vendor: "ONNX".to_string(),
            version: "1.0.0".to_string(),
            device: "CPU (reference interpreter)".to_string(),
            max_graph_size: 1_000_000,
            max_graph_count: 1,
            log_filter: "warn".to_string(),
        }
    }
}

impl BackendConfig {
    /// Load config from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BackendConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Config from the file named by [`CONFIG_ENV`], else defaults.
    ///
    /// The log filter from [`LOG_ENV`] or `RUST_LOG` overrides the file.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(filter) = std::env::var(LOG_ENV).ok().or_else(|| std::env::var("RUST_LOG").ok()) {
            config.log_filter = filter;
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Install a global `fmt` subscriber filtered by `filter`.
///
/// Returns false if a subscriber is already installed.
pub fn init_logging(filter: &str) -> bool {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BackendConfig::default();
        assert_eq!(config.name, "onnx-xla");
        assert_eq!(config.version, "1.0.0");
        assert_eq!(config.max_graph_size, 1_000_000);
        assert_eq!(config.max_graph_count, 1);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = std::env::temp_dir().join(format!("onnx-xla-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "vendor": "Example", "max_graph_count": 4 }"#).unwrap();
        let config = BackendConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.vendor, "Example");
        assert_eq!(config.max_graph_count, 4);
        assert_eq!(config.name, "onnx-xla");
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let path = std::env::temp_dir().join(format!("onnx-xla-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let err = BackendConfig::from_file(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, crate::CompilerError::Config(_)));
    }

    #[test]
    fn test_json_round_trip() {
        let config = BackendConfig::default();
        let back: BackendConfig = serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
