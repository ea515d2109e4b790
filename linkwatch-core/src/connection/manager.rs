//! Connection manager: connect, serialized exec, recovery and teardown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{Route, RouteKey};

use super::error::{SessionError, SessionResult};
use super::event::{ConnectionEvent, ConnectionEventKind, EVENT_CHANNEL_CAPACITY};
use super::keepalive;
use super::retry::Backoff;
use super::session::{CommandOutcome, Link, Session, SessionInner, SessionState};
use super::settings::ConnectionSettings;
use super::ssh::OpenSshTransport;
use super::transport::Transport;

/// Registry entry for one route
enum RouteSlot {
    /// `connect` is establishing the hops
    Connecting,
    /// Session built for the route; dead or inactive sessions free the slot
    Live(Weak<SessionInner>),
}

type RouteRegistry = Arc<Mutex<HashMap<RouteKey, RouteSlot>>>;

/// Builds sessions from routes and runs commands on them
///
/// At most one session is active per route: a second [`connect`] for a
/// route whose session is neither fatal nor disconnected is rejected.
/// Every session gets a supervisor task that sends keepalive probes and
/// drives the reconnect policy. State changes are published on a broadcast
/// channel, see [`ConnectionManager::subscribe`].
///
/// [`connect`]: ConnectionManager::connect
#[derive(Clone)]
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    settings: Arc<ConnectionSettings>,
    events: broadcast::Sender<ConnectionEvent>,
    routes: RouteRegistry,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager on top of `transport`
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, settings: ConnectionSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            settings: Arc::new(settings),
            events,
            routes: Arc::default(),
        }
    }

    /// Creates a manager driving the system `ssh` client
    #[must_use]
    pub fn openssh(settings: ConnectionSettings) -> Self {
        let mut transport = OpenSshTransport::new().with_connect_timeout(settings.connect_timeout());
        if let Some(ref dir) = settings.control_dir {
            transport = transport.with_control_dir(dir.clone());
        }
        Self::new(Arc::new(transport), settings)
    }

    /// Settings this manager was built with
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Subscribes to connection-state events of every session
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Active session of `route`, if any
    #[must_use]
    pub fn active_session(&self, route: &Route) -> Option<Session> {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        match routes.get(&route.key()) {
            Some(RouteSlot::Live(weak)) => weak
                .upgrade()
                .map(|inner| Session { inner })
                .filter(Session::is_active),
            Some(RouteSlot::Connecting) | None => None,
        }
    }

    /// Establishes every hop of `route` in order and returns the live session
    ///
    /// # Errors
    ///
    /// - [`SessionError::RouteInUse`] while another session of the same
    ///   route is connecting, connected or reconnecting
    /// - [`SessionError::ConnectFailed`] naming the first hop that could not
    ///   be established. Nothing is left running in that case.
    #[instrument(name = "connection.establish", skip_all, fields(route = %route))]
    pub async fn connect(&self, route: Route) -> SessionResult<Session> {
        let started = Instant::now();
        let reservation = self.reserve(&route)?;
        let route = Arc::new(route);
        let channel = self.transport.open(&route).await.inspect_err(|e| {
            warn!(error = %e, "Connection failed");
        })?;

        let session = Session::new(route, channel);
        reservation.fill(&session);
        info!(
            session_id = %session.id(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Session established"
        );
        self.emit(&session, ConnectionEventKind::Connected { generation: 1 });

        let supervisor = keepalive::spawn_supervisor(self.clone(), &session);
        session.store_supervisor(supervisor);
        Ok(session)
    }

    /// Runs `command` on `session` after every earlier submission finished
    ///
    /// `timeout` covers the time spent queued behind other commands as well
    /// as the command itself. A command that times out while running, or a
    /// broken channel, degrades the session and starts the reconnect policy;
    /// a late reply can therefore never leak into the next command.
    ///
    /// # Errors
    ///
    /// - [`SessionError::ExecTimeout`] when `timeout` elapses
    /// - [`SessionError::SessionLost`] when the link broke or is being rebuilt
    /// - [`SessionError::ConnectionFatal`] once reconnecting gave up
    /// - [`SessionError::Disconnected`] after [`Self::disconnect`]
    #[instrument(
        name = "session.exec",
        skip_all,
        fields(session_id = %session.id(), command = %command)
    )]
    pub async fn exec(
        &self,
        session: &Session,
        command: &str,
        timeout: Duration,
    ) -> SessionResult<CommandOutcome> {
        let deadline = Instant::now() + timeout;
        let timed_out = || SessionError::ExecTimeout {
            command: command.to_string(),
            timeout,
        };

        let Ok(mut link) = tokio::time::timeout_at(deadline, session.inner.link.lock()).await else {
            debug!("Timed out waiting for the session");
            return Err(timed_out());
        };
        ensure_serving(session, &link)?;
        let Some(channel) = link.channel.as_mut() else {
            return Err(SessionError::SessionLost("channel closed".to_string()));
        };

        let generation = session.generation();
        let started_at = Utc::now();
        let started = Instant::now();

        let result = tokio::time::timeout_at(deadline, channel.exec(command)).await;
        match result {
            Ok(Ok(output)) => {
                let duration = started.elapsed();
                debug!(
                    exit_status = ?output.exit_status,
                    duration_ms = duration.as_millis() as u64,
                    "Command finished"
                );
                Ok(CommandOutcome {
                    command: command.to_string(),
                    exit_status: output.exit_status,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    started_at,
                    duration,
                    generation,
                })
            }
            Ok(Err(error)) => {
                warn!(error = %error, "Command failed on the channel");
                if error.triggers_reconnect() {
                    self.degrade_locked(session, &mut link, error.to_string())
                        .await;
                }
                Err(error)
            }
            Err(_) => {
                let error = timed_out();
                warn!(error = %error, "Command timed out");
                self.degrade_locked(session, &mut link, error.to_string())
                    .await;
                Err(error)
            }
        }
    }

    /// Asks for a new link on behalf of a caller that saw repeated failures
    ///
    /// `observed_generation` is the generation the caller's failures ran on.
    /// Returns `Ok(true)` when this call started a recovery and `Ok(false)`
    /// when one is already running or the link was replaced meanwhile.
    ///
    /// # Errors
    ///
    /// Returns the fatal error once reconnecting gave up, or
    /// [`SessionError::Disconnected`] for a closed session.
    pub async fn reconnect(&self, session: &Session, observed_generation: u64) -> SessionResult<bool> {
        let mut link = session.inner.link.lock().await;
        match session.state() {
            SessionState::Disconnected => return Err(SessionError::Disconnected),
            SessionState::Fatal => return Err(fatal_error(&link)),
            SessionState::Degraded | SessionState::Reconnecting => return Ok(false),
            SessionState::Connected => {}
        }
        if session.generation() != observed_generation {
            debug!(
                session_id = %session.id(),
                observed_generation,
                "Link already replaced, ignoring reconnect request"
            );
            return Ok(false);
        }

        self.degrade_locked(session, &mut link, "reconnect requested".to_string())
            .await;
        Ok(true)
    }

    /// Closes `session` and stops its supervisor; safe to call repeatedly
    #[instrument(name = "connection.disconnect", skip_all, fields(session_id = %session.id()))]
    pub async fn disconnect(&self, session: &Session) {
        session.inner.shutdown.cancel();
        if let Some(supervisor) = session.take_supervisor() {
            let _ = supervisor.await;
        }

        let mut link = session.inner.link.lock().await;
        if session.state() == SessionState::Disconnected {
            return;
        }
        if let Some(mut channel) = link.channel.take() {
            channel.close().await;
        }
        session.set_state(SessionState::Disconnected);
        drop(link);
        self.release(session);
        info!("Session disconnected");
        self.emit(session, ConnectionEventKind::Disconnected);
    }

    /// Claims the registry slot of `route` for a new session
    fn reserve(&self, route: &Route) -> SessionResult<Reservation> {
        let key = route.key();
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let holder = match routes.get(&key) {
            Some(RouteSlot::Connecting) => Some(Uuid::nil()),
            Some(RouteSlot::Live(weak)) => weak
                .upgrade()
                .map(|inner| Session { inner })
                .filter(Session::is_active)
                .map(|session| session.id()),
            None => None,
        };
        if let Some(session_id) = holder {
            warn!(%session_id, "Route already has an active session");
            return Err(SessionError::RouteInUse {
                route: route.to_string(),
                session_id,
            });
        }
        routes.insert(key.clone(), RouteSlot::Connecting);
        Ok(Reservation {
            routes: Arc::clone(&self.routes),
            key: Some(key),
        })
    }

    /// Frees the registry slot held by `session`
    fn release(&self, session: &Session) {
        let key = session.route().key();
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(RouteSlot::Live(weak)) = routes.get(&key) {
            if std::ptr::eq(weak.as_ptr(), Arc::as_ptr(&session.inner)) {
                routes.remove(&key);
            }
        }
    }

    /// Runs one keepalive probe, queued like any other command
    pub(crate) async fn probe(&self, session: &Session) {
        let probe_timeout = self.settings.keepalive.probe_timeout();
        let mut link = session.inner.link.lock().await;
        if session.state() != SessionState::Connected {
            return;
        }
        let Some(channel) = link.channel.as_mut() else {
            return;
        };

        let result = tokio::time::timeout(probe_timeout, channel.probe()).await;
        let reason = match result {
            Ok(Ok(())) => {
                tracing::trace!(session_id = %session.id(), "Keepalive probe ok");
                return;
            }
            Ok(Err(e)) => format!("keepalive probe failed: {e}"),
            Err(_) => format!(
                "keepalive probe timed out after {}ms",
                probe_timeout.as_millis()
            ),
        };
        warn!(session_id = %session.id(), %reason, "Keepalive failed");
        self.degrade_locked(session, &mut link, reason).await;
    }

    /// Rebuilds the link of a degraded session with backoff
    ///
    /// Ends in `Connected` with a bumped generation, or in `Fatal` once the
    /// retry policy is exhausted.
    #[instrument(name = "session.recover", skip_all, fields(session_id = %session.id()))]
    pub(crate) async fn recover(&self, session: &Session) {
        {
            let _link = session.inner.link.lock().await;
            if session.state() != SessionState::Degraded {
                return;
            }
            session.set_state(SessionState::Reconnecting);
        }

        let mut backoff = Backoff::new(self.settings.retry.clone());
        while let Some(delay) = backoff.next_delay() {
            let attempt = backoff.attempts();
            self.emit(session, ConnectionEventKind::Reconnecting { attempt, delay });
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
            tokio::time::sleep(delay).await;

            match self.transport.open(session.route()).await {
                Ok(mut channel) => {
                    let mut link = session.inner.link.lock().await;
                    if session.state() != SessionState::Reconnecting {
                        channel.close().await;
                        return;
                    }
                    link.channel = Some(channel);
                    let generation = session.bump_generation();
                    session.set_state(SessionState::Connected);
                    info!(attempt, generation, "Session reconnected");
                    self.emit(session, ConnectionEventKind::Connected { generation });
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    backoff.record_failure(e.to_string());
                }
            }
        }

        let fatal = SessionError::ConnectionFatal {
            attempts: backoff.attempts(),
            last_error: backoff
                .last_error()
                .unwrap_or("reconnect disabled")
                .to_string(),
        };
        let mut link = session.inner.link.lock().await;
        if session.state() != SessionState::Reconnecting {
            return;
        }
        error!(error = %fatal, "Giving up on session");
        link.fatal = Some(fatal.clone());
        session.set_state(SessionState::Fatal);
        self.emit(
            session,
            ConnectionEventKind::Fatal {
                reason: fatal.to_string(),
            },
        );
    }

    /// Drops the channel of a connected session and wakes its supervisor
    async fn degrade_locked(&self, session: &Session, link: &mut Link, reason: String) {
        if session.state() != SessionState::Connected {
            return;
        }
        if let Some(mut channel) = link.channel.take() {
            channel.close().await;
        }
        session.set_state(SessionState::Degraded);
        warn!(
            session_id = %session.id(),
            generation = session.generation(),
            %reason,
            "Session degraded"
        );
        self.emit(session, ConnectionEventKind::Degraded { reason });
        session.inner.recover.notify_one();
    }

    fn emit(&self, session: &Session, kind: ConnectionEventKind) {
        // No subscribers is fine
        let _ = self.events.send(ConnectionEvent::new(session.id(), kind));
    }
}

/// Registry slot held by an in-progress `connect`
///
/// Dropping it without [`Reservation::fill`] frees the slot, so a failed or
/// cancelled connect never blocks the route.
struct Reservation {
    routes: RouteRegistry,
    key: Option<RouteKey>,
}

impl Reservation {
    fn fill(mut self, session: &Session) {
        if let Some(key) = self.key.take() {
            self.routes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, RouteSlot::Live(Arc::downgrade(&session.inner)));
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(routes.get(&key), Some(RouteSlot::Connecting)) {
                routes.remove(&key);
            }
        }
    }
}

fn ensure_serving(session: &Session, link: &Link) -> SessionResult<()> {
    match session.state() {
        SessionState::Connected => Ok(()),
        SessionState::Degraded | SessionState::Reconnecting => Err(SessionError::SessionLost(
            "session is reconnecting".to_string(),
        )),
        SessionState::Fatal => Err(fatal_error(link)),
        SessionState::Disconnected => Err(SessionError::Disconnected),
    }
}

fn fatal_error(link: &Link) -> SessionError {
    link.fatal.clone().unwrap_or(SessionError::Disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{KeepaliveConfig, RetryConfig};
    use crate::models::{Credentials, Hop};
    use crate::testing::{ScriptedReply, ScriptedTransport};

    fn settings() -> ConnectionSettings {
        ConnectionSettings::default()
            .with_keepalive(KeepaliveConfig::disabled())
            .with_retry(
                RetryConfig::new()
                    .with_max_attempts(3)
                    .with_initial_delay_ms(100)
                    .with_jitter(0.0),
            )
    }

    fn route() -> Route {
        Route::direct("sut", Hop::target("sut-1", Credentials::user("root")))
    }

    #[tokio::test(start_paused = true)]
    async fn test_exec_records_generation_and_output() {
        let transport = ScriptedTransport::new();
        transport.respond("hostname", ScriptedReply::stdout("sut-1\n"));
        let manager = ConnectionManager::new(Arc::new(transport.clone()), settings());

        let session = manager.connect(route()).await.unwrap();
        let outcome = manager
            .exec(&session, "hostname", Duration::from_secs(1))
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.stdout, "sut-1\n");
        assert_eq!(outcome.generation, 1);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_and_recovers() {
        let transport = ScriptedTransport::new();
        transport.push_reply("slow", ScriptedReply::Hang);
        let manager = ConnectionManager::new(Arc::new(transport.clone()), settings());
        let mut events = manager.subscribe();

        let session = manager.connect(route()).await.unwrap();
        let err = manager
            .exec(&session, "slow", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ExecTimeout { .. }));
        assert_eq!(session.state(), SessionState::Degraded);

        let err = manager
            .exec(&session, "true", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionLost(_)));

        let mut state = session.watch_state();
        state
            .wait_for(|s| *s == SessionState::Connected)
            .await
            .unwrap();
        assert_eq!(session.generation(), 2);

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert!(matches!(kinds[0], ConnectionEventKind::Connected { generation: 1 }));
        assert!(matches!(kinds[1], ConnectionEventKind::Degraded { .. }));
        assert!(matches!(
            kinds[2],
            ConnectionEventKind::Reconnecting { attempt: 1, .. }
        ));
        assert!(matches!(kinds[3], ConnectionEventKind::Connected { generation: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_turn_fatal() {
        let transport = ScriptedTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport.clone()), settings());
        let session = manager.connect(route()).await.unwrap();

        transport.fail_opens(u32::MAX);
        assert!(manager.reconnect(&session, 1).await.unwrap());

        let mut state = session.watch_state();
        state.wait_for(|s| *s == SessionState::Fatal).await.unwrap();

        let err = manager
            .exec(&session, "true", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ConnectionFatal { attempts: 3, .. }));
        assert!(manager.reconnect(&session, 1).await.unwrap_err().is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reconnect_request_is_ignored() {
        let transport = ScriptedTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport.clone()), settings());
        let session = manager.connect(route()).await.unwrap();

        assert!(!manager.reconnect(&session, 0).await.unwrap());
        assert!(session.is_connected());
        assert!(manager.reconnect(&session, 1).await.unwrap());
        // already recovering
        assert!(!manager.reconnect(&session, 1).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let transport = ScriptedTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport), settings());
        let mut events = manager.subscribe();
        let session = manager.connect(route()).await.unwrap();

        manager.disconnect(&session).await;
        manager.disconnect(&session).await;

        assert_eq!(session.state(), SessionState::Disconnected);
        let err = manager
            .exec(&session, "true", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::Disconnected);

        let disconnects = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| e.kind == ConnectionEventKind::Disconnected)
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_names_hop() {
        let transport = ScriptedTransport::new();
        transport.fail_opens(1);
        let manager = ConnectionManager::new(Arc::new(transport), settings());

        let err = manager.connect(route()).await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectFailed { hop: 0, .. }));

        // the failed attempt does not hold the route
        assert!(manager.connect(route()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_active_session_per_route() {
        let transport = ScriptedTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport.clone()), settings());
        let first = manager.connect(route()).await.unwrap();

        let renamed = Route::direct("sut-again", Hop::target("sut-1", Credentials::user("root")));
        let err = manager.connect(renamed).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::RouteInUse {
                route: "root@sut-1".into(),
                session_id: first.id(),
            }
        );
        assert_eq!(transport.open_count(), 1);
        assert_eq!(manager.active_session(&route()).map(|s| s.id()), Some(first.id()));

        // other routes are unaffected
        let local = manager.connect(Route::local()).await.unwrap();
        assert_ne!(local.id(), first.id());

        manager.disconnect(&first).await;
        assert!(manager.active_session(&route()).is_none());
        let second = manager.connect(route()).await.unwrap();
        assert_ne!(second.id(), first.id());
        assert_eq!(transport.open_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnecting_session_still_holds_route() {
        let transport = ScriptedTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport.clone()), settings());
        let session = manager.connect(route()).await.unwrap();

        transport.fail_opens(u32::MAX);
        assert!(manager.reconnect(&session, 1).await.unwrap());
        assert!(matches!(
            manager.connect(route()).await,
            Err(SessionError::RouteInUse { .. })
        ));

        let mut state = session.watch_state();
        state.wait_for(|s| *s == SessionState::Fatal).await.unwrap();
        transport.fail_opens(0);
        let fresh = manager.connect(route()).await.unwrap();
        assert_eq!(fresh.generation(), 1);
        assert!(fresh.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_frees_route() {
        let transport = ScriptedTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport), settings());
        let session = manager.connect(route()).await.unwrap();
        drop(session);

        assert!(manager.connect(route()).await.is_ok());
    }
}
