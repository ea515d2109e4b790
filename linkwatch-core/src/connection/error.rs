//! Errors raised by the route/session layer.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors from connecting, executing commands and recovering sessions
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// A hop failed to authenticate or could not be reached
    #[error("Connection to hop {hop} ({host}) failed: {cause}")]
    ConnectFailed {
        /// Index of the failing hop within the route
        hop: usize,
        /// Host of the failing hop
        host: String,
        /// Reason reported by the transport
        cause: String,
    },

    /// The command did not finish within its timeout
    #[error("Command '{command}' timed out after {}ms", timeout.as_millis())]
    ExecTimeout {
        /// Command that timed out
        command: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The underlying channel is broken or is being rebuilt
    #[error("Session lost: {0}")]
    SessionLost(String),

    /// Reconnect attempts are exhausted; the session will not recover
    #[error("Connection lost permanently after {attempts} reconnect attempts: {last_error}")]
    ConnectionFatal {
        /// Reconnect attempts made before giving up
        attempts: u32,
        /// Last error seen while reconnecting
        last_error: String,
    },

    /// The session was explicitly disconnected
    #[error("Session is disconnected")]
    Disconnected,

    /// Another session is active for the same route
    #[error("Route {route} already has an active session ({session_id})")]
    RouteInUse {
        /// Route as displayed
        route: String,
        /// Session holding the route, nil while it is still connecting
        session_id: Uuid,
    },
}

impl SessionError {
    /// Returns true if this error leaves the session in need of a reconnect
    #[must_use]
    pub const fn triggers_reconnect(&self) -> bool {
        matches!(self, Self::SessionLost(_) | Self::ExecTimeout { .. })
    }

    /// Returns true if the session can no longer be used
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionFatal { .. } | Self::Disconnected)
    }
}

/// Result type for session operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SessionError::SessionLost("eof".into()).triggers_reconnect());
        assert!(
            SessionError::ExecTimeout {
                command: "true".into(),
                timeout: Duration::from_secs(1),
            }
            .triggers_reconnect()
        );
        let fatal = SessionError::ConnectionFatal {
            attempts: 3,
            last_error: "refused".into(),
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.triggers_reconnect());
        assert!(SessionError::Disconnected.is_fatal());
    }

    #[test]
    fn test_display_names_the_hop() {
        let err = SessionError::ConnectFailed {
            hop: 0,
            host: "bastion".into(),
            cause: "Permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "Connection to hop 0 (bastion) failed: Permission denied"
        );
    }
}
