//! Owner of every worker of one sampling target.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionEvent, ConnectionManager, Session, SessionState};
use crate::monitoring::{
    ProbeCatalog, REPORT_CHANNEL_CAPACITY, SamplingClass, SamplingSettings, SeriesKey,
    SeriesSnapshot, SeriesStore, Worker, WorkerConfig, WorkerExit, WorkerHandle, WorkerKey,
    WorkerReport,
};

use super::error::{WorkError, WorkResult};

/// Aggregated state of a work manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum WorkStatus {
    /// No workers started yet, or after reset
    Idle,
    /// Workers are sampling
    Running,
    /// Workers were stopped; series are still readable
    Stopped,
    /// The session gave up; nothing restarts until a new session is bound
    Fatal {
        /// First fatal error seen
        reason: String,
    },
}

/// What happened to the workers during stop or reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StopSummary {
    /// Workers that ended on their own within the grace period
    pub stopped: usize,
    /// Workers that had already ended because the session was gone
    pub ended_early: usize,
    /// Workers that had to be aborted
    pub aborted: usize,
}

/// Reacts to worker reports and connection events for one session
struct Supervisor {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Starts, stops and resets the workers of one target
///
/// The manager is the only owner of its [`SeriesStore`]; workers hold the
/// writers and readers get snapshots through [`WorkManager::series`].
/// Consecutive-failure reports from workers are turned into reconnect
/// requests. A fatal connection failure is reported once through
/// [`WorkManager::status`] and nothing is restarted automatically.
#[derive(Debug)]
pub struct WorkManager {
    manager: ConnectionManager,
    settings: SamplingSettings,
    catalog: ProbeCatalog,
    session: Option<Session>,
    store: Arc<SeriesStore>,
    workers: BTreeMap<WorkerKey, WorkerHandle>,
    reports: Option<mpsc::Sender<WorkerReport>>,
    supervisor: Option<Supervisor>,
    status: watch::Sender<WorkStatus>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("finished", &self.join.is_finished())
            .finish()
    }
}

impl WorkManager {
    /// Creates a manager sampling through `session`
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(
        manager: ConnectionManager,
        session: Session,
        settings: SamplingSettings,
        catalog: ProbeCatalog,
    ) -> Self {
        let (status, _) = watch::channel(WorkStatus::Idle);
        let store = Arc::new(SeriesStore::new(settings.effective_series_capacity()));
        let mut work = Self {
            manager,
            settings,
            catalog,
            session: None,
            store,
            workers: BTreeMap::new(),
            reports: None,
            supervisor: None,
            status,
        };
        work.bind(session);
        work
    }

    /// Creates a manager whose probes come from `settings`
    ///
    /// # Errors
    ///
    /// Returns [`WorkError::Catalog`] for invalid command overrides.
    pub fn from_settings(
        manager: ConnectionManager,
        session: Session,
        settings: SamplingSettings,
    ) -> WorkResult<Self> {
        let catalog = ProbeCatalog::from_settings(&settings)?;
        Ok(Self::new(manager, session, settings, catalog))
    }

    /// Starts one worker per (interface, class) pair
    ///
    /// Either every requested worker is started or none is.
    ///
    /// # Errors
    ///
    /// - [`WorkError::DuplicateWorker`] if a pair is already running or
    ///   requested twice
    /// - [`WorkError::NoSession`] / [`WorkError::SessionFatal`] without a
    ///   usable session
    /// - [`WorkError::MissingProbe`] for a class with no probes
    pub fn start<S: AsRef<str>>(
        &mut self,
        interfaces: &[S],
        classes: &[SamplingClass],
    ) -> WorkResult<Vec<WorkerKey>> {
        if interfaces.is_empty() {
            return Err(WorkError::NoInterfaces);
        }
        if classes.is_empty() {
            return Err(WorkError::NoClasses);
        }
        if let WorkStatus::Fatal { reason } = self.status() {
            return Err(WorkError::SessionFatal(reason));
        }
        let session = self.session.clone().ok_or(WorkError::NoSession)?;
        if matches!(
            session.state(),
            SessionState::Fatal | SessionState::Disconnected
        ) {
            return Err(WorkError::SessionFatal(format!("session is {}", session.state())));
        }
        let reports = self.reports.clone().ok_or(WorkError::NoSession)?;

        let mut requested = BTreeSet::new();
        for interface in interfaces {
            for &class in classes {
                let key = WorkerKey::new(interface.as_ref(), class);
                if self.workers.contains_key(&key) || !requested.insert(key.clone()) {
                    return Err(WorkError::DuplicateWorker {
                        interface: key.interface,
                        class,
                    });
                }
            }
        }
        for &class in classes {
            if self.catalog.probes(class).is_empty() {
                return Err(WorkError::MissingProbe { class });
            }
        }

        let mut started = Vec::with_capacity(requested.len());
        for key in requested {
            let probes = self
                .catalog
                .probes(key.class)
                .iter()
                .map(|probe| {
                    let writer = self
                        .store
                        .writer(SeriesKey::new(key.interface.clone(), probe.metric()));
                    (probe.clone(), writer)
                })
                .collect();
            let worker = Worker::new(
                key.clone(),
                WorkerConfig::for_class(&self.settings, key.class),
                probes,
                self.manager.clone(),
                session.clone(),
                reports.clone(),
                CancellationToken::new(),
            );
            self.workers.insert(key.clone(), worker.spawn());
            started.push(key);
        }

        info!(workers = started.len(), total = self.workers.len(), "Workers started");
        self.status.send_replace(WorkStatus::Running);
        Ok(started)
    }

    /// Starts the interfaces and classes listed in the sampling settings
    ///
    /// # Errors
    ///
    /// Same as [`Self::start`].
    pub fn start_configured(&mut self) -> WorkResult<Vec<WorkerKey>> {
        let interfaces = self.settings.interfaces.clone();
        let classes = self.settings.classes.clone();
        self.start(&interfaces, &classes)
    }

    /// Stops every worker and waits a bounded time for each to end
    ///
    /// Series stay readable until [`Self::reset`].
    pub async fn stop(&mut self) -> StopSummary {
        let summary = self.stop_workers().await;
        if !matches!(self.status(), WorkStatus::Fatal { .. }) {
            self.status.send_replace(WorkStatus::Stopped);
        }
        summary
    }

    /// Stops every worker, drops every series and releases the session
    ///
    /// Bind a new session with [`Self::rebind`] before starting again.
    pub async fn reset(&mut self) -> StopSummary {
        let summary = self.stop_workers().await;
        self.unbind().await;
        self.store.clear();
        self.status.send_replace(WorkStatus::Idle);
        info!("Work manager reset");
        summary
    }

    /// Binds a new session, clearing a fatal status
    ///
    /// # Errors
    ///
    /// Returns [`WorkError::Busy`] while workers are running.
    pub async fn rebind(&mut self, session: Session) -> WorkResult<()> {
        if !self.workers.is_empty() {
            return Err(WorkError::Busy);
        }
        self.unbind().await;
        self.bind(session);
        self.status.send_replace(WorkStatus::Idle);
        Ok(())
    }

    /// Snapshot of one series
    #[must_use]
    pub fn series(&self, interface: &str, metric: &str) -> Option<SeriesSnapshot> {
        self.store.snapshot(&SeriesKey::new(interface, metric))
    }

    /// Snapshots of every series of `interface`
    #[must_use]
    pub fn series_for(&self, interface: &str) -> Vec<SeriesSnapshot> {
        self.store.snapshots_for(interface)
    }

    /// Snapshots of every series
    #[must_use]
    pub fn all_series(&self) -> Vec<SeriesSnapshot> {
        self.store.snapshots()
    }

    /// Keys of every started worker
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerKey> {
        self.workers.keys().cloned().collect()
    }

    /// Number of workers whose task is still running
    #[must_use]
    pub fn running_workers(&self) -> usize {
        self.workers.values().filter(|w| !w.is_finished()).count()
    }

    /// Current aggregated status
    #[must_use]
    pub fn status(&self) -> WorkStatus {
        self.status.borrow().clone()
    }

    /// Receiver observing status changes
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<WorkStatus> {
        self.status.subscribe()
    }

    /// Session currently bound
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Sampling settings in use
    #[must_use]
    pub const fn settings(&self) -> &SamplingSettings {
        &self.settings
    }

    /// Longest a worker may take to notice a stop request
    fn stop_grace(&self) -> Duration {
        let longest_interval = self
            .workers
            .keys()
            .map(|key| self.settings.interval(key.class))
            .max()
            .unwrap_or_default();
        longest_interval + self.settings.exec_timeout()
    }

    async fn stop_workers(&mut self) -> StopSummary {
        if self.workers.is_empty() {
            return StopSummary::default();
        }
        let grace = self.stop_grace();
        let workers = std::mem::take(&mut self.workers);
        for handle in workers.values() {
            handle.stop();
        }

        let exits = join_all(
            workers
                .into_values()
                .map(|handle| handle.shutdown(grace)),
        )
        .await;

        let mut summary = StopSummary::default();
        for exit in exits {
            match exit {
                Some(WorkerExit::Cancelled) => summary.stopped += 1,
                Some(WorkerExit::SessionClosed | WorkerExit::ConnectionFatal(_)) => {
                    summary.ended_early += 1;
                }
                None => summary.aborted += 1,
            }
        }
        info!(
            stopped = summary.stopped,
            ended_early = summary.ended_early,
            aborted = summary.aborted,
            "Workers stopped"
        );
        summary
    }

    fn bind(&mut self, session: Session) {
        let (reports_tx, reports_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let join = tokio::spawn(supervise(
            self.manager.clone(),
            session.clone(),
            reports_rx,
            self.manager.subscribe(),
            self.status.clone(),
            cancel.clone(),
        ));
        debug!(session_id = %session.id(), "Session bound");
        self.session = Some(session);
        self.reports = Some(reports_tx);
        self.supervisor = Some(Supervisor { cancel, join });
    }

    async fn unbind(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.cancel.cancel();
            let _ = supervisor.join.await;
        }
        self.reports = None;
        self.session = None;
    }
}

impl Drop for WorkManager {
    fn drop(&mut self) {
        for handle in self.workers.values() {
            handle.abort();
        }
        if let Some(ref supervisor) = self.supervisor {
            supervisor.cancel.cancel();
            supervisor.join.abort();
        }
    }
}

async fn supervise(
    manager: ConnectionManager,
    session: Session,
    mut reports: mpsc::Receiver<WorkerReport>,
    mut events: broadcast::Receiver<ConnectionEvent>,
    status: watch::Sender<WorkStatus>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            report = reports.recv() => match report {
                Some(WorkerReport::ReconnectRequested { key, generation, failures }) => {
                    match manager.reconnect(&session, generation).await {
                        Ok(true) => info!(worker = %key, failures, "Reconnect started"),
                        Ok(false) => debug!(worker = %key, "Reconnect already handled"),
                        Err(e) => mark_fatal(&status, e.to_string()),
                    }
                }
                Some(WorkerReport::ConnectionFatal { key, error }) => {
                    warn!(worker = %key, %error, "Worker stopped on fatal connection error");
                    mark_fatal(&status, error.to_string());
                }
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) if event.session_id == session.id() && event.is_fatal() => {
                    if let crate::connection::ConnectionEventKind::Fatal { reason } = event.kind {
                        mark_fatal(&status, reason);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Connection events lagged");
                    if session.state() == SessionState::Fatal {
                        mark_fatal(&status, "session is fatal".to_string());
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Records the first fatal error; later ones are dropped
fn mark_fatal(status: &watch::Sender<WorkStatus>, reason: String) {
    let changed = status.send_if_modified(|current| {
        if matches!(current, WorkStatus::Fatal { .. }) {
            false
        } else {
            *current = WorkStatus::Fatal {
                reason: reason.clone(),
            };
            true
        }
    });
    if changed {
        error!(%reason, "Sampling halted by fatal connection failure");
    }
}
