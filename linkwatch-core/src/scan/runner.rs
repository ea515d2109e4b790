//! Port scanner: drives a [`PortMachine`] per port against the switch session

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::{ConnectionManager, Session};
use crate::models::{CommandTemplate, PortId};

use super::evaluator::EyeScanEvaluator;
use super::machine::{PortMachine, ScanEvent, ScanState};
use super::result::{
    AttemptOutcome, AttemptTiming, PhaseTiming, PortScanResult, ScanOutcome, ScanReport,
};
use super::settings::{ScanConfig, ScanConfigError, ScanSettings, SwitchCommands};

const CANCELLED: &str = "scan cancelled";

/// Scans switch ports one after another over a single session
pub struct PortScanner {
    manager: ConnectionManager,
    session: Session,
    config: Arc<ScanConfig>,
    evaluator: Arc<dyn EyeScanEvaluator>,
}

impl std::fmt::Debug for PortScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortScanner")
            .field("session", &self.session.id())
            .field("ports", &self.config.ports.len())
            .field("toggle_limit", &self.config.toggle_limit)
            .finish_non_exhaustive()
    }
}

impl PortScanner {
    /// Creates a scanner for `session`, which should target the switch
    #[must_use]
    pub fn new(
        manager: ConnectionManager,
        session: Session,
        config: ScanConfig,
        evaluator: Arc<dyn EyeScanEvaluator>,
    ) -> Self {
        Self {
            manager,
            session,
            config: Arc::new(config),
            evaluator,
        }
    }

    /// Creates a scanner from file settings
    ///
    /// # Errors
    ///
    /// Returns [`ScanConfigError`] when the settings do not validate.
    pub fn from_settings(
        manager: ConnectionManager,
        session: Session,
        settings: &ScanSettings,
    ) -> Result<Self, ScanConfigError> {
        let config = settings.to_config()?;
        let evaluator = settings.evaluator.build()?;
        Ok(Self::new(manager, session, config, evaluator))
    }

    /// Scan configuration
    #[must_use]
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scans every configured port in order
    ///
    /// Each finished port is also sent on `results` when given. After
    /// cancellation the current port ends as aborted and the remaining ports
    /// are reported as aborted without touching the switch.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        results: Option<&mpsc::Sender<PortScanResult>>,
    ) -> ScanReport {
        let mut report = ScanReport::new();
        info!(
            session_id = %self.session.id(),
            ports = self.config.ports.len(),
            "Port scan started"
        );

        for (index, &port) in self.config.ports.iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(self.config.scan_interval) => {}
                }
            }

            let result = if cancel.is_cancelled() {
                PortScanResult::not_started(port, CANCELLED)
            } else {
                self.scan_port(port, cancel).await
            };

            if let Some(tx) = results {
                if tx.send(result.clone()).await.is_err() {
                    debug!("Result receiver dropped");
                }
            }
            report.push(result);
        }

        info!(summary = %report, "Port scan finished");
        report
    }

    /// Runs [`Self::run`] on a new task
    pub fn spawn(
        self,
        cancel: CancellationToken,
        results: Option<mpsc::Sender<PortScanResult>>,
    ) -> JoinHandle<ScanReport> {
        tokio::spawn(async move { self.run(&cancel, results.as_ref()).await })
    }

    /// Runs the toggle/eye-scan cycle on one port until it is terminal
    #[instrument(name = "scan.port", skip_all, fields(port = %port))]
    pub async fn scan_port(&self, port: PortId, cancel: &CancellationToken) -> PortScanResult {
        let started_at = Utc::now();
        let mut machine = PortMachine::new(self.config.toggle_limit);
        let mut history = Vec::new();
        let mut current = None;
        // Set between a successful toggle-off and the matching toggle-on,
        // even when cancellation discarded the command result
        let mut port_down = false;

        let mut next = ScanEvent::Begin;
        loop {
            let attempt_before = machine.attempt();
            let state = match machine.handle(next) {
                Ok(state) => state,
                Err(error) => {
                    warn!(%error, "Port scan left the state machine");
                    machine.abort(error.to_string());
                    machine.state()
                }
            };

            if state.is_terminal() || machine.attempt() != attempt_before {
                if let Some(timing) = current.take() {
                    history.push(finish_attempt(timing, &machine, state));
                }
            }
            if state.is_terminal() {
                break;
            }
            if current.is_none() {
                debug!(attempt = machine.attempt(), "Toggle attempt started");
                current = Some(AttemptTiming {
                    attempt: machine.attempt(),
                    started_at: Utc::now(),
                    phases: Vec::new(),
                    outcome: AttemptOutcome::Aborted {
                        reason: CANCELLED.to_string(),
                    },
                });
            }

            let phase_started = Instant::now();
            next = self.step(state, port, cancel, &mut port_down).await;
            if let Some(timing) = current.as_mut() {
                timing.phases.push(PhaseTiming {
                    phase: state,
                    elapsed_ms: u64::try_from(phase_started.elapsed().as_millis())
                        .unwrap_or(u64::MAX),
                });
            }
        }

        if port_down {
            self.restore(port).await;
        }

        let outcome = match machine.state() {
            ScanState::Pass => ScanOutcome::Pass,
            ScanState::Fail => ScanOutcome::Fail {
                reason: machine.last_failure().unwrap_or("eye scan failed").to_string(),
            },
            _ => ScanOutcome::Aborted {
                reason: machine.abort_reason().unwrap_or(CANCELLED).to_string(),
            },
        };
        info!(attempts = machine.attempt(), outcome = %outcome, "Port finished");

        PortScanResult {
            port,
            attempts: machine.attempt(),
            outcome,
            history,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Executes the work of `state` and reports what happened
    ///
    /// `port_down` follows what the switch actually did, so it is updated
    /// before cancellation is looked at.
    async fn step(
        &self,
        state: ScanState,
        port: PortId,
        cancel: &CancellationToken,
        port_down: &mut bool,
    ) -> ScanEvent {
        let commands = &self.config.commands;
        match state {
            ScanState::ToggleOff => {
                let run = self.command(&commands.toggle_off, port, cancel).await;
                if run.succeeded {
                    *port_down = true;
                }
                run.event
            }
            ScanState::WaitToggle => wait(self.config.toggle_wait, cancel).await,
            ScanState::ToggleOn => {
                let run = self.command(&commands.toggle_on, port, cancel).await;
                if run.succeeded {
                    *port_down = false;
                }
                run.event
            }
            ScanState::WaitEyeScan => wait(self.config.eye_scan_wait, cancel).await,
            ScanState::Evaluate => {
                let run = self.command(&commands.eye_scan, port, cancel).await;
                if run.event != ScanEvent::CommandOk {
                    return run.event;
                }
                match self.evaluator.evaluate(&run.stdout) {
                    Ok(verdict) => {
                        debug!(%verdict, "Eye scan evaluated");
                        ScanEvent::Verdict(verdict)
                    }
                    Err(e) => ScanEvent::CommandFailed(format!("unreadable eye scan: {e}")),
                }
            }
            ScanState::Idle | ScanState::Pass | ScanState::Fail | ScanState::Aborted => {
                ScanEvent::Cancelled
            }
        }
    }

    /// Runs a switch command; the command itself is never interrupted
    async fn command(
        &self,
        template: &CommandTemplate,
        port: PortId,
        cancel: &CancellationToken,
    ) -> CommandRun {
        if cancel.is_cancelled() {
            return CommandRun::skipped();
        }
        let command = SwitchCommands::render(template, port);
        let result = self
            .manager
            .exec(&self.session, &command, self.config.command_timeout)
            .await;
        let succeeded = result.as_ref().is_ok_and(|outcome| outcome.success());
        if cancel.is_cancelled() {
            return CommandRun {
                succeeded,
                ..CommandRun::skipped()
            };
        }

        let (event, stdout) = match result {
            Ok(outcome) if outcome.success() => (ScanEvent::CommandOk, outcome.stdout),
            Ok(outcome) => {
                let status = outcome
                    .exit_status
                    .map_or_else(|| "signal".to_string(), |c| c.to_string());
                debug!(%command, %status, "Switch command failed");
                (
                    ScanEvent::CommandFailed(format!(
                        "'{command}' exited with {status}: {}",
                        outcome.stderr.trim()
                    )),
                    String::new(),
                )
            }
            Err(error) => {
                warn!(%command, %error, "Switch session failed");
                (ScanEvent::ConnectionLost(error.to_string()), String::new())
            }
        };
        CommandRun {
            event,
            stdout,
            succeeded,
        }
    }

    /// Brings a port back up after an interrupted attempt
    async fn restore(&self, port: PortId) {
        let command = SwitchCommands::render(&self.config.commands.toggle_on, port);
        match self
            .manager
            .exec(&self.session, &command, self.config.command_timeout)
            .await
        {
            Ok(outcome) if outcome.success() => info!("Port restored after abort"),
            Ok(_) | Err(_) => warn!("Could not restore port after abort"),
        }
    }
}

/// What a switch command did
struct CommandRun {
    /// Event for the state machine
    event: ScanEvent,
    /// Output, kept only for a successful command
    stdout: String,
    /// The command ran and exited 0, whether or not the run was cancelled
    succeeded: bool,
}

impl CommandRun {
    fn skipped() -> Self {
        Self {
            event: ScanEvent::Cancelled,
            stdout: String::new(),
            succeeded: false,
        }
    }
}

async fn wait(duration: Duration, cancel: &CancellationToken) -> ScanEvent {
    tokio::select! {
        biased;
        () = cancel.cancelled() => ScanEvent::Cancelled,
        () = tokio::time::sleep(duration) => ScanEvent::WaitElapsed,
    }
}

fn finish_attempt(mut timing: AttemptTiming, machine: &PortMachine, state: ScanState) -> AttemptTiming {
    timing.outcome = match state {
        ScanState::Pass => AttemptOutcome::Passed,
        ScanState::Aborted => AttemptOutcome::Aborted {
            reason: machine.abort_reason().unwrap_or(CANCELLED).to_string(),
        },
        _ => AttemptOutcome::Failed {
            reason: machine
                .last_failure()
                .unwrap_or("eye scan failed")
                .to_string(),
        },
    };
    timing
}
