//! Client configuration, loaded from TOML with full defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the orchestrator's REST surface.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Explicit websocket endpoint; derived from `server_url` when absent.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Human-input poll cadence.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Snapshot sync cadence (open PRs, background workers, stats, metrics).
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

fn default_sync_interval_ms() -> u64 {
    30_000
}

fn default_event_log_capacity() -> usize {
    crate::event_log::DEFAULT_LOG_CAPACITY
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            ws_url: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            sync_interval_ms: default_sync_interval_ms(),
            event_log_capacity: default_event_log_capacity(),
        }
    }
}

impl BridgeConfig {
    /// The websocket endpoint: explicit `ws_url` when configured, otherwise
    /// `server_url` with the scheme swapped and `/ws` appended.
    pub fn websocket_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }
        let base = self.server_url.trim_end_matches('/');
        let swapped = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{base}")
        };
        format!("{swapped}/ws")
    }
}

pub fn parse_config(contents: &str) -> Result<BridgeConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<BridgeConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}
