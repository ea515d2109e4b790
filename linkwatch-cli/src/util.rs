//! Shared utility functions used across command modules.

use std::path::PathBuf;

use linkwatch_core::config::{ConfigManager, HopSettings, LinkwatchConfig, RouteSettings};
use linkwatch_core::connection::ConnectionManager;
use linkwatch_core::tracing::{TracingLevel, init_tracing};
use secrecy::SecretString;

use crate::cli::Cli;
use crate::error::CliError;

/// Flags shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Configuration file given on the command line
    pub config: Option<PathBuf>,
    /// Number of `-v` flags
    pub verbose: u8,
    /// Suppress everything but errors
    pub quiet: bool,
    /// Use ANSI colors
    pub color: bool,
}

impl From<&Cli> for GlobalOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            verbose: cli.verbose,
            quiet: cli.quiet,
            color: !cli.no_color,
        }
    }
}

/// Creates a `ConfigManager` using the optional config file from CLI args.
pub fn create_config_manager(options: &GlobalOptions) -> Result<ConfigManager, CliError> {
    match &options.config {
        Some(path) => Ok(ConfigManager::with_config_file(path.clone())),
        None => ConfigManager::new()
            .map_err(|e| CliError::Config(format!("Failed to initialize config: {e}"))),
    }
}

/// Loads and validates the configuration, then sets up logging from it
pub fn load_config(options: &GlobalOptions) -> Result<LinkwatchConfig, CliError> {
    let config = create_config_manager(options)?.load()?;
    init_logging(options, &config);
    Ok(config)
}

/// Installs the tracing subscriber; `-v` and `--quiet` win over the file
fn init_logging(options: &GlobalOptions, config: &LinkwatchConfig) {
    let mut tracing = config.logging.to_tracing_config();
    if options.quiet {
        tracing = tracing.with_level(TracingLevel::Error);
    } else if options.verbose > 0 {
        tracing = tracing.with_level(TracingLevel::from_verbosity(options.verbose));
    }
    if let Err(e) = init_tracing(&tracing) {
        if !options.quiet {
            eprintln!("Warning: logging disabled: {e}");
        }
    }
}

/// Creates the Tokio runtime a command runs on
pub fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::Connection(format!("Failed to create async runtime: {e}")))
}

/// Connection manager over the system `ssh` client
pub fn connection_manager(config: &LinkwatchConfig) -> ConnectionManager {
    ConnectionManager::openssh(config.connection.clone())
}

/// Prompts for the password of every hop that has neither a password nor a key
pub fn prompt_passwords(route: &mut RouteSettings) -> Result<(), CliError> {
    for hop in route.hops.iter_mut().filter(|h| needs_password(h)) {
        let prompt = match &hop.user {
            Some(user) => format!("Password for {user}@{}: ", hop.host),
            None => format!("Password for {}: ", hop.host),
        };
        let password = rpassword::prompt_password(prompt)?;
        hop.password = Some(SecretString::from(password));
    }
    Ok(())
}

fn needs_password(hop: &HopSettings) -> bool {
    !hop.has_password() && hop.identity_file.is_none()
}
