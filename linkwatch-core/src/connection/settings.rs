//! Connection settings (stored in `linkwatch.toml` under `[connection]`)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::retry::RetryConfig;

/// Keepalive probing for live sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Whether probes run at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Time between probes in milliseconds (default: 15000)
    #[serde(default = "default_keepalive_interval_ms")]
    pub interval_ms: u64,
    /// Time a single probe may take in milliseconds (default: 5000)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_keepalive_interval_ms() -> u64 {
    15_000
}

const fn default_probe_timeout_ms() -> u64 {
    5_000
}

const fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_keepalive_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl KeepaliveConfig {
    /// Disabled keepalive
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Probe period, never shorter than 100ms
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(100))
    }

    /// Probe timeout, never shorter than 50ms
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(50))
    }
}

/// Settings for the [`super::ConnectionManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Reconnect policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Keepalive probing
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    /// Per-hop authentication timeout in milliseconds (default: 10000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Directory for ssh control sockets (default: system temp dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_dir: Option<PathBuf>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            keepalive: KeepaliveConfig::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            control_dir: None,
        }
    }
}

impl ConnectionSettings {
    /// Sets the reconnect policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets keepalive probing
    #[must_use]
    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Per-hop authentication timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1000))
    }
}
