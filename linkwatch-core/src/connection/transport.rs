//! Transport abstraction between the connection manager and a remote shell.
//!
//! A [`Transport`] turns a [`Route`] into a live [`Channel`]. The manager
//! owns serialization, timeouts and recovery; channels only need to run one
//! command at a time and report a broken link as
//! [`SessionError::SessionLost`].

use async_trait::async_trait;

use crate::models::Route;

use super::error::SessionResult;

/// Raw result of one command on a channel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelOutput {
    /// Exit code, `None` when the remote process was killed by a signal
    pub exit_status: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ChannelOutput {
    /// Successful output with the given stdout
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Output with a non-zero exit code
    #[must_use]
    pub fn failed(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_status: Some(exit_status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// A live, authenticated command channel built from a route
///
/// The manager never calls into a channel concurrently.
#[async_trait]
pub trait Channel: Send {
    /// Runs `command` to completion on the command target
    ///
    /// A non-zero exit status is not an error; a broken link is
    /// [`SessionError::SessionLost`](super::SessionError::SessionLost).
    async fn exec(&mut self, command: &str) -> SessionResult<ChannelOutput>;

    /// Cheap liveness check used by the keepalive loop
    async fn probe(&mut self) -> SessionResult<()>;

    /// Tears down every hop; must be safe to call more than once
    async fn close(&mut self);
}

/// Factory for channels
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes all hops of `route` in order
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectFailed`](super::SessionError::ConnectFailed)
    /// naming the failing hop. Hops that were already up are torn down
    /// before returning.
    async fn open(&self, route: &Route) -> SessionResult<Box<dyn Channel>>;
}
