//! Top-level error type
//!
//! Each layer has its own error enum; [`LinkwatchError`] wraps them for
//! callers that drive several layers at once, such as the CLI.

use thiserror::Error;

use crate::config::ConfigError;
use crate::connection::SessionError;
use crate::monitoring::CatalogError;
use crate::scan::ScanConfigError;
use crate::tracing::TracingError;
use crate::work::WorkError;

/// Any error raised by linkwatch-core
#[derive(Debug, Error)]
pub enum LinkwatchError {
    /// Configuration file problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Session could not be established or was lost for good
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Probe definitions are inconsistent
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Worker lifecycle problem
    #[error(transparent)]
    Work(#[from] WorkError),

    /// Scan settings are invalid
    #[error(transparent)]
    Scan(#[from] ScanConfigError),

    /// Logging could not be set up
    #[error(transparent)]
    Tracing(#[from] TracingError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkwatchError {
    /// Returns true for errors caused by the network or the remote end
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Session(_) | Self::Work(WorkError::SessionFatal(_) | WorkError::NoSession)
        )
    }
}

/// Result type using [`LinkwatchError`]
pub type Result<T> = std::result::Result<T, LinkwatchError>;
