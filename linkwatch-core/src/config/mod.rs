//! Configuration file handling
//!
//! [`ConfigManager`] loads and saves `linkwatch.toml`; [`LinkwatchConfig`]
//! is its in-memory form, holding the routes plus the sampling, connection,
//! scan and logging sections.

mod manager;
mod settings;

use std::path::PathBuf;

use thiserror::Error;

pub use manager::{CONFIG_FILE_NAME, ConfigManager, DEFAULT_CONFIG_TEMPLATE};
pub use settings::{HopSettings, LinkwatchConfig, LoggingSettings, RouteSettings};

/// Errors from reading, writing or validating the configuration
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The platform has no configuration directory
    #[error("Cannot determine the configuration directory")]
    NoConfigDir,

    /// The configuration file does not exist
    #[error("Configuration file not found: {} (run `linkwatch init`)", .0.display())]
    NotFound(PathBuf),

    /// Refused to overwrite an existing file
    #[error("Configuration file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// The file could not be read
    #[error("Failed to read configuration: {0}")]
    Read(String),

    /// The file is not valid TOML for this schema
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// The configuration could not be rendered as TOML
    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    /// The file could not be written
    #[error("Failed to write configuration: {0}")]
    Write(String),

    /// A value is out of range or inconsistent
    #[error("Invalid configuration {0}")]
    Invalid(String),

    /// A section needed by the command is missing
    #[error("Missing [{0}] section in configuration")]
    MissingSection(&'static str),
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
