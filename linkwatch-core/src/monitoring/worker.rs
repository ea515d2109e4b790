//! Sample collector for one (interface, sampling class) pair
//!
//! A worker ticks at its class interval, runs each probe of the class
//! through the [`ConnectionManager`], parses the output and appends one
//! sample per probe. Failures become error samples. After
//! `failure_threshold` consecutive failures the worker reports to its owner
//! instead of reconnecting by itself.
//!
//! Stopping is cooperative: the cancellation token is checked at the top of
//! every cycle, while waiting for the next tick and after every command. A
//! command already running is allowed to finish (bounded by its timeout)
//! and its result is discarded.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, info, warn};

use crate::connection::{ConnectionManager, Session, SessionError};

use super::probe::{MetricProbe, SamplingClass};
use super::series::{Sample, SeriesWriter};
use super::settings::SamplingSettings;

/// Capacity of the report channel shared by the workers of one manager
pub const REPORT_CHANNEL_CAPACITY: usize = 32;

/// Identity of a worker
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WorkerKey {
    /// Sampled interface
    pub interface: String,
    /// Sampling class
    pub class: SamplingClass,
}

impl WorkerKey {
    /// Creates a key
    #[must_use]
    pub fn new(interface: impl Into<String>, class: SamplingClass) -> Self {
        Self {
            interface: interface.into(),
            class,
        }
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.interface, self.class)
    }
}

/// Timing and failure policy of one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Time between cycle starts
    pub interval: Duration,
    /// Timeout of every command
    pub exec_timeout: Duration,
    /// Consecutive failures before a reconnect is requested
    pub failure_threshold: u32,
}

impl WorkerConfig {
    /// Config of `class` taken from the sampling settings
    #[must_use]
    pub fn for_class(settings: &SamplingSettings, class: SamplingClass) -> Self {
        Self {
            interval: settings.interval(class),
            exec_timeout: settings.exec_timeout(),
            failure_threshold: settings.effective_failure_threshold(),
        }
    }
}

/// Message from a worker to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReport {
    /// Too many consecutive failures on `generation`
    ReconnectRequested {
        /// Reporting worker
        key: WorkerKey,
        /// Session generation the failures happened on
        generation: u64,
        /// Consecutive failures counted
        failures: u32,
    },
    /// The session gave up reconnecting; the worker has stopped
    ConnectionFatal {
        /// Reporting worker
        key: WorkerKey,
        /// Error returned by the session
        error: SessionError,
    },
}

/// Why a worker loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stopped through its cancellation token
    Cancelled,
    /// The session was disconnected under it
    SessionClosed,
    /// The session turned fatal
    ConnectionFatal(SessionError),
}

/// Sampling loop bound to one interface, one class and one session
pub struct Worker {
    key: WorkerKey,
    config: WorkerConfig,
    probes: Vec<(MetricProbe, SeriesWriter)>,
    manager: ConnectionManager,
    session: Session,
    reports: mpsc::Sender<WorkerReport>,
    cancel: CancellationToken,
    failures: u32,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("key", &self.key)
            .field("config", &self.config)
            .field("probes", &self.probes.len())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Creates a worker; every dependency is passed in here
    #[must_use]
    pub fn new(
        key: WorkerKey,
        config: WorkerConfig,
        probes: Vec<(MetricProbe, SeriesWriter)>,
        manager: ConnectionManager,
        session: Session,
        reports: mpsc::Sender<WorkerReport>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key,
            config,
            probes,
            manager,
            session,
            reports,
            cancel,
            failures: 0,
        }
    }

    /// Identity of this worker
    #[must_use]
    pub const fn key(&self) -> &WorkerKey {
        &self.key
    }

    /// Runs the loop on a new task
    #[must_use]
    pub fn spawn(self) -> WorkerHandle {
        let key = self.key.clone();
        let cancel = self.cancel.clone();
        let join = tokio::spawn(self.run());
        WorkerHandle { key, cancel, join }
    }

    /// Runs the sampling loop until cancelled or the session is gone
    pub async fn run(mut self) -> WorkerExit {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(worker = %self.key, interval_ms = self.config.interval.as_millis() as u64, "Worker started");

        let exit = loop {
            if self.cancel.is_cancelled() {
                break WorkerExit::Cancelled;
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break WorkerExit::Cancelled,
                _ = ticker.tick() => {}
            }

            let span = debug_span!(
                "worker.cycle",
                interface = %self.key.interface,
                class = %self.key.class
            );
            if let Some(exit) = self.cycle().instrument(span).await {
                break exit;
            }
        };

        info!(worker = %self.key, ?exit, "Worker stopped");
        exit
    }

    /// One pass over every probe; `Some` ends the loop
    async fn cycle(&mut self) -> Option<WorkerExit> {
        for index in 0..self.probes.len() {
            if self.cancel.is_cancelled() {
                return Some(WorkerExit::Cancelled);
            }

            let (command, metric) = {
                let (probe, _) = &self.probes[index];
                (probe.command_for(&self.key.interface), probe.metric().to_string())
            };
            let generation = self.session.generation();
            let timestamp = Utc::now();
            let result = self
                .manager
                .exec(&self.session, &command, self.config.exec_timeout)
                .await;

            if self.cancel.is_cancelled() {
                return Some(WorkerExit::Cancelled);
            }

            let (probe, writer) = &self.probes[index];
            match result {
                Ok(outcome) if outcome.success() => {
                    self.failures = 0;
                    let sample = match probe.parser().parse(&outcome.stdout) {
                        Ok(value) => Sample::value(timestamp, &self.key.interface, &metric, value),
                        Err(e) => {
                            debug!(%metric, error = %e, "Output did not parse");
                            Sample::error(timestamp, &self.key.interface, &metric, e.to_string())
                        }
                    };
                    writer.append(sample);
                }
                Ok(outcome) => {
                    let reason = format!(
                        "exit status {}: {}",
                        outcome
                            .exit_status
                            .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                        outcome.stderr.trim()
                    );
                    writer.append(Sample::error(timestamp, &self.key.interface, &metric, reason));
                    self.record_failure(outcome.generation).await;
                }
                Err(SessionError::Disconnected) => {
                    return Some(WorkerExit::SessionClosed);
                }
                Err(error @ SessionError::ConnectionFatal { .. }) => {
                    writer.append(Sample::error(
                        timestamp,
                        &self.key.interface,
                        &metric,
                        error.to_string(),
                    ));
                    warn!(worker = %self.key, %error, "Session is gone, worker stopping");
                    let _ = self
                        .reports
                        .send(WorkerReport::ConnectionFatal {
                            key: self.key.clone(),
                            error: error.clone(),
                        })
                        .await;
                    return Some(WorkerExit::ConnectionFatal(error));
                }
                Err(error) => {
                    writer.append(Sample::error(
                        timestamp,
                        &self.key.interface,
                        &metric,
                        error.to_string(),
                    ));
                    self.record_failure(generation).await;
                }
            }
        }
        None
    }

    async fn record_failure(&mut self, generation: u64) {
        self.failures += 1;
        debug!(worker = %self.key, failures = self.failures, "Sampling failed");
        if self.failures < self.config.failure_threshold {
            return;
        }

        warn!(
            worker = %self.key,
            failures = self.failures,
            generation,
            "Consecutive failures reached threshold, requesting reconnect"
        );
        let report = WorkerReport::ReconnectRequested {
            key: self.key.clone(),
            generation,
            failures: self.failures,
        };
        self.failures = 0;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            _ = self.reports.send(report) => {}
        }
    }
}

/// Handle to a spawned worker
#[derive(Debug)]
pub struct WorkerHandle {
    key: WorkerKey,
    cancel: CancellationToken,
    join: JoinHandle<WorkerExit>,
}

impl WorkerHandle {
    /// Identity of the worker
    #[must_use]
    pub const fn key(&self) -> &WorkerKey {
        &self.key
    }

    /// Asks the worker to stop
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the task has ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stops the worker and waits up to `grace` for it to end
    ///
    /// Returns `None` if the task had to be aborted or panicked.
    pub async fn shutdown(self, grace: Duration) -> Option<WorkerExit> {
        self.cancel.cancel();
        let mut join = self.join;
        match tokio::time::timeout(grace, &mut join).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) => {
                warn!(worker = %self.key, error = %e, "Worker task failed");
                None
            }
            Err(_) => {
                warn!(worker = %self.key, "Worker did not stop in time, aborting");
                join.abort();
                None
            }
        }
    }

    /// Aborts the task without waiting
    pub fn abort(&self) {
        self.cancel.cancel();
        self.join.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connection::{ConnectionSettings, KeepaliveConfig};
    use crate::models::Route;
    use crate::monitoring::{NumberParser, SeriesKey, SeriesStore};
    use crate::testing::{ScriptedReply, ScriptedTransport};

    struct Fixture {
        transport: ScriptedTransport,
        manager: ConnectionManager,
        session: Session,
        store: SeriesStore,
        reports: mpsc::Receiver<WorkerReport>,
        sender: mpsc::Sender<WorkerReport>,
    }

    async fn fixture() -> Fixture {
        let transport = ScriptedTransport::new();
        let manager = ConnectionManager::new(
            Arc::new(transport.clone()),
            ConnectionSettings::default().with_keepalive(KeepaliveConfig::disabled()),
        );
        let session = manager.connect(Route::local()).await.unwrap();
        let (sender, reports) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        Fixture {
            transport,
            manager,
            session,
            store: SeriesStore::new(100),
            reports,
            sender,
        }
    }

    fn worker(f: &Fixture, threshold: u32, cancel: CancellationToken) -> Worker {
        let key = WorkerKey::new("eth0", SamplingClass::HighResolution);
        let probe = MetricProbe::new(
            "rx_bytes",
            "cat /sys/class/net/{interface}/statistics/rx_bytes",
            NumberParser,
        );
        let writer = f.store.writer(SeriesKey::new("eth0", "rx_bytes"));
        Worker::new(
            key,
            WorkerConfig {
                interval: Duration::from_millis(100),
                exec_timeout: Duration::from_millis(50),
                failure_threshold: threshold,
            },
            vec![(probe, writer)],
            f.manager.clone(),
            f.session.clone(),
            f.sender.clone(),
            cancel,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_values_and_parse_errors() {
        let f = fixture().await;
        f.transport.respond("rx_bytes", ScriptedReply::stdout("1000\n"));
        f.transport.push_reply("rx_bytes", ScriptedReply::stdout("garbage"));
        let cancel = CancellationToken::new();
        let handle = worker(&f, 3, cancel.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(350)).await;
        let exit = handle.shutdown(Duration::from_secs(1)).await;
        assert_eq!(exit, Some(WorkerExit::Cancelled));

        let snapshot = f.store.snapshot(&SeriesKey::new("eth0", "rx_bytes")).unwrap();
        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.samples[0].is_error());
        assert_eq!(
            snapshot.last().and_then(|s| s.metric_value()).and_then(|v| v.as_number()),
            Some(1000.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_requested_at_threshold() {
        let mut f = fixture().await;
        f.transport.respond("rx_bytes", ScriptedReply::exit(1, "No such device"));
        let handle = worker(&f, 3, CancellationToken::new()).spawn();

        // cycles at 0, 100, 200
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(f.reports.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;
        let report = f.reports.try_recv().unwrap();
        assert_eq!(
            report,
            WorkerReport::ReconnectRequested {
                key: WorkerKey::new("eth0", SamplingClass::HighResolution),
                generation: 1,
                failures: 3,
            }
        );
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_session_ends_worker() {
        let f = fixture().await;
        let handle = worker(&f, 3, CancellationToken::new()).spawn();
        f.manager.disconnect(&f.session).await;

        let exit = tokio::time::timeout(Duration::from_secs(1), handle.join)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(exit, WorkerExit::SessionClosed | WorkerExit::Cancelled));
    }
}
