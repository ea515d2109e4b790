//! Loading and saving `linkwatch.toml`

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::settings::LinkwatchConfig;
use super::{ConfigError, ConfigResult};

/// File name inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "linkwatch.toml";

/// Annotated configuration written by `linkwatch init`
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# linkwatch configuration

[logging]
level = "warn"

# Host whose interfaces are sampled. Use `local = true` to run the
# commands on this machine, or list hops in connection order.
[target]
name = "sut"

[[target.hops]]
host = "bastion.example.net"
user = "ops"

[[target.hops]]
host = "sut-1"
user = "root"
# password = "..."
# identity_file = "~/.ssh/id_ed25519"

# Switch under test for port scans.
# [switch]
# name = "switch"
#
# [[switch.hops]]
# host = "sw-1"
# user = "admin"

[sampling]
interfaces = ["eth2", "eth3"]
classes = ["low-resolution", "high-resolution", "error-rate"]
low_resolution_ms = 5000
high_resolution_ms = 1000
error_rate_ms = 10000
series_capacity = 600
failure_threshold = 3
exec_timeout_ms = 5000

[connection]
connect_timeout_ms = 10000

[connection.retry]
max_attempts = 5
initial_delay_ms = 1000
max_delay_ms = 30000
backoff_multiplier = 2.0
jitter = 0.1

[connection.keepalive]
enabled = true
interval_ms = 15000
probe_timeout_ms = 5000

[scan]
ports = ["1/1", "1/2"]
scan_interval_ms = 1000
toggle_limit = 3
toggle_wait_ms = 5000
eye_scan_wait_ms = 10000
command_timeout_ms = 30000
"#;

/// Reads and writes the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Manager for the default location (`~/.config/linkwatch/linkwatch.toml`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfigDir`] when the platform has no
    /// configuration directory.
    pub fn new() -> ConfigResult<Self> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::with_config_dir(dir.join("linkwatch")))
    }

    /// Manager for `linkwatch.toml` inside `dir`
    #[must_use]
    pub fn with_config_dir(dir: PathBuf) -> Self {
        Self {
            path: dir.join(CONFIG_FILE_NAME),
        }
    }

    /// Manager for an explicit file
    #[must_use]
    pub fn with_config_file(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the configuration file
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the file exists
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Loads and validates the configuration
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NotFound`] if the file does not exist
    /// - [`ConfigError::Read`] / [`ConfigError::Parse`] for unreadable files
    /// - [`ConfigError::Invalid`] when validation fails
    pub fn load(&self) -> ConfigResult<LinkwatchConfig> {
        if !self.exists() {
            return Err(ConfigError::NotFound(self.path.clone()));
        }
        let text = fs::read_to_string(&self.path)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", self.path.display())))?;
        let config = Self::parse(&text)?;
        debug!(path = %self.path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parses and validates configuration text
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn parse(text: &str) -> ConfigResult<LinkwatchConfig> {
        let config: LinkwatchConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes `config`, creating the directory if needed
    ///
    /// Passwords are not written.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] or [`ConfigError::Write`].
    pub fn save(&self, config: &LinkwatchConfig) -> ConfigResult<()> {
        let text =
            toml::to_string_pretty(config).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        self.write(&text)
    }

    /// Writes [`DEFAULT_CONFIG_TEMPLATE`]
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyExists`] unless `overwrite` is set, or
    /// [`ConfigError::Write`] when the file cannot be written.
    pub fn write_default(&self, overwrite: bool) -> ConfigResult<&Path> {
        if self.exists() && !overwrite {
            return Err(ConfigError::AlreadyExists(self.path.clone()));
        }
        self.write(DEFAULT_CONFIG_TEMPLATE)?;
        info!(path = %self.path.display(), "Default configuration written");
        Ok(&self.path)
    }

    fn write(&self, text: &str) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Write(format!("{}: {e}", parent.display())))?;
        }
        fs::write(&self.path, text)
            .map_err(|e| ConfigError::Write(format!("{}: {e}", self.path.display())))
    }
}
