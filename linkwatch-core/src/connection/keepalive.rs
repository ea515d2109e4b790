//! Per-session supervisor task: keepalive probes and reconnect driving.

use std::future;
use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

use super::manager::ConnectionManager;
use super::session::{Session, SessionInner, SessionState};

enum Wake {
    Probe,
    Recover,
}

/// Spawns the supervisor of `session`
///
/// The task only holds a weak reference between wakeups, so dropping every
/// handle of a session ends it. It also ends on shutdown and once the
/// session turned fatal.
pub(crate) fn spawn_supervisor(manager: ConnectionManager, session: &Session) -> JoinHandle<()> {
    let weak: Weak<SessionInner> = Arc::downgrade(&session.inner);
    let shutdown = session.inner.shutdown.clone();
    let recover = Arc::clone(&session.inner.recover);
    let keepalive = manager.settings().keepalive.clone();
    let session_id = session.id();

    tokio::spawn(async move {
        let mut ticker = keepalive.enabled.then(|| {
            let period = keepalive.interval();
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let wake = tokio::select! {
                () = shutdown.cancelled() => break,
                () = recover.notified() => Wake::Recover,
                () = next_tick(ticker.as_mut()) => Wake::Probe,
            };

            let Some(inner) = weak.upgrade() else {
                break;
            };
            let session = Session { inner };

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = async {
                    match wake {
                        Wake::Probe => manager.probe(&session).await,
                        Wake::Recover => manager.recover(&session).await,
                    }
                } => {}
            }

            if matches!(
                session.state(),
                SessionState::Fatal | SessionState::Disconnected
            ) {
                break;
            }
        }
        debug!(%session_id, "Session supervisor stopped");
    })
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}
