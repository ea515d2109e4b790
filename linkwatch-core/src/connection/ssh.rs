//! OpenSSH transport built on control masters
//!
//! Every hop gets its own `ssh -M -S <socket> -N` master process. The first
//! master connects directly; each following master is tunnelled through the
//! previous one with `ProxyCommand ssh -S <socket> -W %h:%p`. Commands then
//! run over the target master's socket, so authentication happens once per
//! link and a dead master shows up as exit status 255.
//!
//! Password hops use `sshpass -e ssh` when `sshpass` is installed, like the
//! interactive session launcher does.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{DEFAULT_SSH_PORT, Hop, Route};

use super::error::{SessionError, SessionResult};
use super::hops::{self, HopLauncher};
use super::local::LocalChannel;
use super::transport::{Channel, ChannelOutput, Transport};

/// Default time allowed for one hop to authenticate (seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Exit status `ssh` uses for its own (connection-level) failures
const SSH_CLIENT_ERROR_STATUS: i32 = 255;

/// How often a starting master is polled for readiness
const MASTER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Transport driving the system `ssh` client
#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    control_dir: PathBuf,
    connect_timeout: Duration,
    sshpass_available: bool,
}

impl Default for OpenSshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenSshTransport {
    /// Creates a transport keeping control sockets in the temp directory
    #[must_use]
    pub fn new() -> Self {
        // Check sshpass availability once at construction time
        let sshpass_available = std::process::Command::new("sshpass")
            .arg("-V")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok();

        Self {
            control_dir: std::env::temp_dir().join("linkwatch"),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            sshpass_available,
        }
    }

    /// Sets the directory holding control sockets
    #[must_use]
    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = dir.into();
        self
    }

    /// Sets the per-hop authentication timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn master_command(&self, hop: &Hop, socket: &Path, via: Option<&Master>) -> Command {
        let mut cmd;
        let password = hop.credentials.password.as_ref();

        if let (Some(pw), true) = (password, self.sshpass_available) {
            cmd = Command::new("sshpass");
            cmd.arg("-e").arg("ssh");
            // sshpass reads the password from SSHPASS with -e
            cmd.env("SSHPASS", pw.expose_secret());
        } else {
            if password.is_some() {
                warn!(host = %hop.host, "sshpass not found, password authentication unavailable");
            }
            cmd = Command::new("ssh");
            cmd.arg("-o").arg("BatchMode=yes");
        }

        cmd.arg("-M").arg("-N");
        cmd.arg("-S").arg(socket);
        cmd.arg("-o").arg("ControlPersist=no");
        cmd.arg("-o").arg("StrictHostKeyChecking=no");
        cmd.arg("-o").arg(format!(
            "ConnectTimeout={}",
            self.connect_timeout.as_secs().max(1)
        ));

        if hop.port != DEFAULT_SSH_PORT {
            cmd.arg("-p").arg(hop.port.to_string());
        }
        if let Some(ref key) = hop.credentials.identity_file {
            cmd.arg("-i").arg(key);
        }
        if let Some(relay) = via {
            cmd.arg("-o").arg(format!(
                "ProxyCommand=ssh -S {} -W %h:%p {}",
                relay.socket.display(),
                relay.destination
            ));
        }

        cmd.arg(hop.destination());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    async fn start_master(
        &self,
        index: usize,
        hop: &Hop,
        via: Option<&Master>,
    ) -> Result<Master, String> {
        let socket = self
            .control_dir
            .join(format!("{}-{index}.sock", Uuid::new_v4().simple()));

        let mut child = self
            .master_command(hop, &socket, via)
            .spawn()
            .map_err(|e| format!("Failed to spawn ssh: {e}"))?;

        let mut master = Master {
            child: None,
            socket,
            destination: hop.destination(),
        };

        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let stderr = read_stderr(&mut child).await;
                    return Err(if stderr.is_empty() {
                        format!("ssh exited with {status}")
                    } else {
                        stderr
                    });
                }
                Ok(None) => {}
                Err(e) => return Err(format!("Failed to poll ssh: {e}")),
            }

            if control_check(&master.socket, &master.destination).await {
                master.child = Some(child);
                return Ok(master);
            }

            if tokio::time::Instant::now() >= deadline {
                let _ = child.kill().await;
                return Err(format!(
                    "Authentication did not complete within {}s",
                    self.connect_timeout.as_secs()
                ));
            }
            tokio::time::sleep(MASTER_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn open(&self, route: &Route) -> SessionResult<Box<dyn Channel>> {
        if route.is_local() {
            return Ok(Box::new(LocalChannel::new()));
        }

        tokio::fs::create_dir_all(&self.control_dir)
            .await
            .map_err(|e| SessionError::ConnectFailed {
                hop: 0,
                host: route.hops()[0].host.clone(),
                cause: format!(
                    "Failed to create control directory '{}': {e}",
                    self.control_dir.display()
                ),
            })?;

        let masters = hops::establish(self, route).await?;
        debug!(hops = masters.len(), "Control masters ready");
        Ok(Box::new(SshChannel { masters }))
    }
}

#[async_trait]
impl HopLauncher for OpenSshTransport {
    type Link = Master;

    async fn start(&self, index: usize, hop: &Hop, via: Option<&Master>) -> Result<Master, String> {
        self.start_master(index, hop, via).await
    }

    async fn stop(&self, master: &mut Master) {
        master.shutdown().await;
    }
}

/// Control master for one hop
#[derive(Debug)]
pub(crate) struct Master {
    child: Option<Child>,
    socket: PathBuf,
    destination: String,
}

impl Master {
    async fn shutdown(&mut self) {
        let _ = Command::new("ssh")
            .arg("-S")
            .arg(&self.socket)
            .arg("-O")
            .arg("exit")
            .arg(&self.destination)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
        let _ = tokio::fs::remove_file(&self.socket).await;
    }
}

async fn read_stderr(child: &mut Child) -> String {
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_string(&mut stderr).await;
    }
    stderr.trim().to_string()
}

async fn control_check(socket: &Path, destination: &str) -> bool {
    Command::new("ssh")
        .arg("-S")
        .arg(socket)
        .arg("-O")
        .arg("check")
        .arg(destination)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .is_ok_and(|status| status.success())
}

/// Channel multiplexed over the target hop's control master
#[derive(Debug)]
struct SshChannel {
    masters: Vec<Master>,
}

impl SshChannel {
    fn target(&self) -> SessionResult<&Master> {
        self.masters
            .last()
            .ok_or_else(|| SessionError::SessionLost("channel closed".to_string()))
    }
}

#[async_trait]
impl Channel for SshChannel {
    async fn exec(&mut self, command: &str) -> SessionResult<ChannelOutput> {
        let target = self.target()?;

        let output = Command::new("ssh")
            .arg("-S")
            .arg(&target.socket)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(&target.destination)
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SessionError::SessionLost(format!("Failed to spawn ssh: {e}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.code() == Some(SSH_CLIENT_ERROR_STATUS) {
            return Err(SessionError::SessionLost(format!(
                "ssh client failed: {}",
                stderr.trim()
            )));
        }

        Ok(ChannelOutput {
            exit_status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    async fn probe(&mut self) -> SessionResult<()> {
        for master in &mut self.masters {
            if let Some(child) = master.child.as_mut()
                && let Ok(Some(status)) = child.try_wait()
            {
                return Err(SessionError::SessionLost(format!(
                    "master for {} exited with {status}",
                    master.destination
                )));
            }
        }

        let target = self.target()?;
        if control_check(&target.socket, &target.destination).await {
            Ok(())
        } else {
            Err(SessionError::SessionLost(format!(
                "control check failed for {}",
                target.destination
            )))
        }
    }

    async fn close(&mut self) {
        while let Some(mut master) = self.masters.pop() {
            master.shutdown().await;
        }
    }
}
