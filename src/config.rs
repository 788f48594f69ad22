//! Console configuration
//!
//! A small YAML file; every field has a default and a missing file means
//! "all defaults".

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::transport::http::DEFINITIONS_PATH;
use crate::transport::socketio::SOCKET_PATH;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Backend base URL; the Socket.IO endpoint and the HTTP routes hang off it
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Delay between reconnect attempts; 0 disables reconnecting
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// CSV overriding the built-in raw-name table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_definitions: Option<PathBuf>,
    /// Directory for a daily rolling log file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub console: ConsoleConfig,
}

/// Console display settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConsoleConfig {
    /// List inactive inputs in the activity view
    #[serde(default)]
    pub show_inactive: bool,
    /// Minimum interval between activity redraws in watch mode
    #[serde(default = "default_activity_refresh_ms")]
    pub activity_refresh_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            show_inactive: false,
            activity_refresh_ms: default_activity_refresh_ms(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            input_definitions: None,
            log_dir: None,
            console: ConsoleConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ClientConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            anyhow::bail!("server_url cannot be empty");
        }
        if split_scheme(&self.server_url).is_none() {
            anyhow::bail!(
                "server_url must be an http(s):// or ws(s):// URL (got '{}')",
                self.server_url
            );
        }
        if self.console.activity_refresh_ms == 0 {
            anyhow::bail!("console.activity_refresh_ms must be greater than 0");
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Option<Duration> {
        match self.reconnect_delay_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    fn backend_host(&self) -> (bool, &str) {
        split_scheme(&self.server_url).unwrap_or((false, "127.0.0.1:5000"))
    }

    /// Engine.IO WebSocket endpoint of the backend
    pub fn socket_url(&self) -> String {
        let (secure, host) = self.backend_host();
        let scheme = if secure { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, host, SOCKET_PATH)
    }

    /// HTTP route serving the input definitions table
    pub fn definitions_url(&self) -> String {
        let (secure, host) = self.backend_host();
        let scheme = if secure { "https" } else { "http" };
        format!("{}://{}{}", scheme, host, DEFINITIONS_PATH)
    }
}

/// `(is_tls, host[:port])` of a backend URL; any path is dropped
fn split_scheme(url: &str) -> Option<(bool, &str)> {
    let url = url.trim();
    let (secure, rest) = if let Some(rest) = url.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("wss://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (false, rest)
    } else {
        (false, url.strip_prefix("ws://")?)
    };

    let host = rest.split('/').next().unwrap_or_default();
    (!host.is_empty()).then_some((secure, host))
}

// Default value functions
fn default_server_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_activity_refresh_ms() -> u64 {
    250
}
