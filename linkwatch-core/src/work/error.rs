//! Work manager errors.

use thiserror::Error;

use crate::monitoring::{CatalogError, SamplingClass};

/// Errors from starting or rebinding workers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkError {
    /// A worker for this pair is already running
    #[error("A worker for {interface}/{class} is already running")]
    DuplicateWorker {
        /// Interface of the pair
        interface: String,
        /// Class of the pair
        class: SamplingClass,
    },

    /// The manager has no session (after reset)
    #[error("No session bound; rebind a session first")]
    NoSession,

    /// The bound session gave up reconnecting
    #[error("Session is no longer usable: {0}")]
    SessionFatal(String),

    /// The catalog has no probe for a requested class
    #[error("No probes defined for sampling class {class}")]
    MissingProbe {
        /// Class without probes
        class: SamplingClass,
    },

    /// `start` was called without interfaces
    #[error("No interfaces to sample")]
    NoInterfaces,

    /// `start` was called without sampling classes
    #[error("No sampling classes selected")]
    NoClasses,

    /// The operation needs every worker to be stopped first
    #[error("Workers are still running; stop them first")]
    Busy,

    /// Invalid probe configuration
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Result type for work manager operations
pub type WorkResult<T> = std::result::Result<T, WorkError>;
