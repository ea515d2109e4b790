//! Live session handle and command outcome records.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::Route;

use super::error::SessionError;
use super::transport::Channel;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Serving commands
    Connected,
    /// Link dropped, waiting for the reconnect policy to start
    Degraded,
    /// Reconnect attempts in progress
    Reconnecting,
    /// Reconnect attempts exhausted
    Fatal,
    /// Closed by its owner
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Degraded => write!(f, "degraded"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Fatal => write!(f, "fatal"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Immutable record of one executed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    /// Command text as sent
    pub command: String,
    /// Exit code, `None` when killed by a signal
    pub exit_status: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
    /// Time the command took
    pub duration: Duration,
    /// Session generation the command ran on
    pub generation: u64,
}

impl CommandOutcome {
    /// Returns true for exit status 0
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_status, Some(0))
    }
}

/// Mutable part of a session, guarded by the fair exec lock
pub(crate) struct Link {
    pub(crate) channel: Option<Box<dyn Channel>>,
    pub(crate) fatal: Option<SessionError>,
}

pub(crate) struct SessionInner {
    pub(crate) id: Uuid,
    pub(crate) route: Arc<Route>,
    pub(crate) generation: AtomicU64,
    /// `tokio::sync::Mutex` queues waiters in FIFO order
    pub(crate) link: tokio::sync::Mutex<Link>,
    pub(crate) state: watch::Sender<SessionState>,
    pub(crate) recover: Arc<Notify>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A live, generation-numbered connection built from a [`Route`]
///
/// Cloning is cheap; every clone refers to the same link. Commands run
/// through [`super::ConnectionManager::exec`], one at a time in submission
/// order.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(route: Arc<Route>, channel: Box<dyn Channel>) -> Self {
        let (state, _) = watch::channel(SessionState::Connected);
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                route,
                generation: AtomicU64::new(1),
                link: tokio::sync::Mutex::new(Link {
                    channel: Some(channel),
                    fatal: None,
                }),
                state,
                recover: Arc::new(Notify::new()),
                shutdown: CancellationToken::new(),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Unique session id
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Route this session was built from
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.inner.route
    }

    /// Generation of the current link (starts at 1)
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Returns true while the session can run commands
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Returns true until the session turned fatal or was disconnected
    ///
    /// An active session holds its route; degraded and reconnecting
    /// sessions count as active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self.state(), SessionState::Fatal | SessionState::Disconnected)
    }

    pub(crate) fn set_state(&self, state: SessionState) -> SessionState {
        self.inner.state.send_replace(state)
    }

    pub(crate) fn bump_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn store_supervisor(&self, handle: JoinHandle<()>) {
        *self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn take_supervisor(&self) -> Option<JoinHandle<()>> {
        self.inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("route", &self.route().to_string())
            .field("generation", &self.generation())
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}
