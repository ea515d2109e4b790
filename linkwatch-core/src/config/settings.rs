//! Settings file model (`linkwatch.toml`)

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionSettings;
use crate::models::{Credentials, DEFAULT_SSH_PORT, Hop, Route};
use crate::monitoring::{ProbeCatalog, SamplingSettings};
use crate::scan::ScanSettings;
use crate::tracing::{TracingConfig, TracingLevel, TracingOutput};

use super::{ConfigError, ConfigResult};

/// Complete configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkwatchConfig {
    /// Host whose interfaces are sampled
    #[serde(default)]
    pub target: RouteSettings,
    /// Switch under test, used by port scans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<RouteSettings>,
    /// Interface sampling
    #[serde(default)]
    pub sampling: SamplingSettings,
    /// Reconnect and keepalive policy shared by every session
    #[serde(default)]
    pub connection: ConnectionSettings,
    /// Port scan
    #[serde(default)]
    pub scan: ScanSettings,
    /// Log output
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl LinkwatchConfig {
    /// Checks everything that can be checked without connecting
    ///
    /// Scan settings are only validated when a switch route is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.target
            .to_route("target")
            .map_err(|e| ConfigError::Invalid(format!("[target]: {e}")))?;
        ProbeCatalog::from_settings(&self.sampling)
            .map_err(|e| ConfigError::Invalid(format!("[sampling]: {e}")))?;
        if let Some(switch) = &self.switch {
            switch
                .to_route("switch")
                .map_err(|e| ConfigError::Invalid(format!("[switch]: {e}")))?;
            self.scan
                .to_config()
                .map_err(|e| ConfigError::Invalid(format!("[scan]: {e}")))?;
            self.scan
                .evaluator
                .build()
                .map_err(|e| ConfigError::Invalid(format!("[scan.evaluator]: {e}")))?;
        }
        Ok(())
    }

    /// Route of the sampled host
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unusable route.
    pub fn target_route(&self) -> ConfigResult<Route> {
        self.target.to_route("target")
    }

    /// Route of the switch
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSection`] when no `[switch]` is
    /// configured, or [`ConfigError::Invalid`] for an unusable route.
    pub fn switch_route(&self) -> ConfigResult<Route> {
        self.switch
            .as_ref()
            .ok_or(ConfigError::MissingSection("switch"))?
            .to_route("switch")
    }
}

/// A route as written in the file: `local = true` or a list of hops
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteSettings {
    /// Display name (defaults to the section name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Run commands on this machine instead of over SSH
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub local: bool,
    /// Hops in connection order; the last one runs the commands
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hops: Vec<HopSettings>,
}

impl RouteSettings {
    /// Local route
    #[must_use]
    pub fn local() -> Self {
        Self {
            name: None,
            local: true,
            hops: Vec::new(),
        }
    }

    /// Route through `hops`
    #[must_use]
    pub fn through(hops: Vec<HopSettings>) -> Self {
        Self {
            name: None,
            local: false,
            hops,
        }
    }

    /// Builds the route; `fallback_name` is used when no name is set
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the route is neither local nor
    /// has hops, or the hop chain does not validate.
    pub fn to_route(&self, fallback_name: &str) -> ConfigResult<Route> {
        if self.local {
            if !self.hops.is_empty() {
                return Err(ConfigError::Invalid(
                    "a local route cannot have hops".to_string(),
                ));
            }
            return Ok(Route::local());
        }
        if self.hops.is_empty() {
            return Err(ConfigError::Invalid(
                "route needs at least one hop or local = true".to_string(),
            ));
        }

        let last = self.hops.len() - 1;
        let hops = self
            .hops
            .iter()
            .enumerate()
            .map(|(index, hop)| hop.to_hop(index == last))
            .collect();
        let name = self.name.as_deref().unwrap_or(fallback_name);
        Route::new(name, hops).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// One hop as written in the file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HopSettings {
    /// Host name or address
    pub host: String,
    /// SSH port (default: 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Login user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password; never written back to disk
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,
    /// Private key file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

const fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl HopSettings {
    /// Hop on the default port
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            ..Self::default()
        }
    }

    /// Sets the login user
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Returns true if a password is configured
    #[must_use]
    pub const fn has_password(&self) -> bool {
        self.password.is_some()
    }

    fn to_hop(&self, is_target: bool) -> Hop {
        let credentials = Credentials {
            username: self.user.clone(),
            password: self.password.clone(),
            identity_file: self.identity_file.clone(),
        };
        let mut hop = if is_target {
            Hop::target(self.host.clone(), credentials)
        } else {
            Hop::jump(self.host.clone(), credentials)
        };
        hop.port = self.port;
        hop
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Level used when no `-v` flag is given (default: "warn")
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write logs to this file instead of stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Include thread ids in log lines
    #[serde(default)]
    pub thread_ids: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            thread_ids: false,
        }
    }
}

impl LoggingSettings {
    /// Tracing configuration; unknown level names fall back to warn
    #[must_use]
    pub fn to_tracing_config(&self) -> TracingConfig {
        let level = self.level.parse::<TracingLevel>().unwrap_or_default();
        let output = self
            .file
            .clone()
            .map_or(TracingOutput::Stderr, TracingOutput::File);
        TracingConfig::new()
            .with_level(level)
            .with_output(output)
            .with_thread_ids(self.thread_ids)
    }
}
