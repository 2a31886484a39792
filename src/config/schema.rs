//! Configuration schema definitions.
//!
//! All sections carry serde defaults so a minimal (or empty) TOML file is a
//! valid configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::runtime::LogSettings;
use crate::sink::entry::default_log_filename;

/// Root configuration for the request logging service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub listener: ListenerConfig,

    /// Initial request-logging settings. Hot-reloaded by the config watcher.
    pub logging: LogSettings,

    pub sink: SinkConfig,

    pub request: RequestConfig,

    pub admin: AdminConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Which sink receives log entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    File,
    Store,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub file: FileSinkConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FileSinkConfig {
    /// Log file path. Defaults to `access-YYYY-MM-DD.log` in the working directory.
    pub path: Option<PathBuf>,
}

impl FileSinkConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_log_filename()))
    }
}

/// SQLite store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// sqlx connection URL (e.g., "sqlite://reqlog.db").
    pub url: String,

    /// Log table name. Must be a plain SQL identifier.
    pub table: String,

    pub max_connections: u32,

    pub acquire_timeout_secs: u64,

    /// Upper bound on every individual store statement.
    pub statement_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://reqlog.db".to_string(),
            table: "request_logs".to_string(),
            max_connections: 25,
            acquire_timeout_secs: 30,
            statement_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Request bodies up to this size (with a known length) are captured for handlers.
    pub max_capture_bytes: usize,

    /// Total time allowed for a request in seconds.
    pub timeout_secs: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_capture_bytes: 64 * 1024,
            timeout_secs: 30,
        }
    }
}

/// Admin API configuration. Requires the store sink.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// Bearer token for the admin API. Empty disables authentication.
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,

    pub metrics_enabled: bool,

    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
