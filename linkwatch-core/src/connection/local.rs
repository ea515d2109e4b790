//! Zero-hop channel that runs commands on the local machine.

use async_trait::async_trait;
use tokio::process::Command;

use crate::models::Route;

use super::error::{SessionError, SessionResult};
use super::transport::{Channel, ChannelOutput, Transport};

/// Runs commands through `sh -c`
#[derive(Debug, Default)]
pub struct LocalChannel {
    closed: bool,
}

impl LocalChannel {
    /// Creates an open local channel
    #[must_use]
    pub const fn new() -> Self {
        Self { closed: false }
    }
}

#[async_trait]
impl Channel for LocalChannel {
    async fn exec(&mut self, command: &str) -> SessionResult<ChannelOutput> {
        if self.closed {
            return Err(SessionError::SessionLost("local channel closed".to_string()));
        }
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SessionError::SessionLost(format!("Failed to spawn shell: {e}")))?;

        Ok(ChannelOutput {
            exit_status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn probe(&mut self) -> SessionResult<()> {
        if self.closed {
            Err(SessionError::SessionLost("local channel closed".to_string()))
        } else {
            Ok(())
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

/// Transport that only accepts the local route
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn open(&self, route: &Route) -> SessionResult<Box<dyn Channel>> {
        if let Some(target) = route.target() {
            return Err(SessionError::ConnectFailed {
                hop: route.len() - 1,
                host: target.host.clone(),
                cause: "local transport cannot reach remote hosts".to_string(),
            });
        }
        Ok(Box::new(LocalChannel::new()))
    }
}
