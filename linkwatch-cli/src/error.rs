//! CLI error types and exit codes.

use linkwatch_core::{ConfigError, LinkwatchError, SessionError, WorkError};

/// Exit codes for CLI operations
pub mod exit_codes {
    /// General error - configuration, validation, or other non-connection errors
    pub const GENERAL_ERROR: i32 = 1;
    /// Connection failure - a route check failed or a session could not be
    /// established or was lost for good
    pub const CONNECTION_FAILURE: i32 = 2;
    /// Port scan finished with at least one port that did not pass
    pub const SCAN_NOT_PASSED: i32 = 3;
}

/// CLI error type
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid command-line arguments
    #[error("Invalid arguments: {0}")]
    Usage(String),

    /// Route check failed
    #[error("Check failed: {0}")]
    CheckFailed(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Sampling error
    #[error("Sampling error: {0}")]
    Sampling(String),

    /// One or more ports did not pass
    #[error("Scan finished with failures: {0}")]
    ScanNotPassed(String),

    /// Output could not be rendered
    #[error("Output error: {0}")]
    Output(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<WorkError> for CliError {
    fn from(err: WorkError) -> Self {
        match err {
            WorkError::SessionFatal(_) | WorkError::NoSession => {
                Self::Connection(err.to_string())
            }
            other => Self::Sampling(other.to_string()),
        }
    }
}

impl From<LinkwatchError> for CliError {
    fn from(err: LinkwatchError) -> Self {
        match err {
            LinkwatchError::Config(e) => e.into(),
            LinkwatchError::Session(e) => e.into(),
            LinkwatchError::Work(e) => e.into(),
            LinkwatchError::Io(e) => Self::Io(e),
            other => Self::Config(other.to_string()),
        }
    }
}

impl CliError {
    /// Returns the appropriate exit code for this error type.
    ///
    /// Exit codes:
    /// - 0: Success (not an error)
    /// - 1: General error (configuration, arguments, sampling, output, IO)
    /// - 2: Connection failure (check failed, session lost)
    /// - 3: Port scan with at least one non-passing port
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::CheckFailed(_) | Self::Connection(_) => exit_codes::CONNECTION_FAILURE,
            Self::ScanNotPassed(_) => exit_codes::SCAN_NOT_PASSED,
            Self::Config(_) | Self::Usage(_) | Self::Sampling(_) | Self::Output(_) | Self::Io(_) => {
                exit_codes::GENERAL_ERROR
            }
        }
    }
}
