//! Session serialization, recovery and lifecycle through the public API

use std::sync::Arc;
use std::time::Duration;

use linkwatch_core::connection::{
    ConnectionEventKind, ConnectionManager, ConnectionSettings, KeepaliveConfig, LocalTransport,
    SessionError, SessionState,
};
use linkwatch_core::models::{Credentials, Hop, Route};
use linkwatch_core::testing::{ScriptedReply, ScriptedTransport};
use tokio::time::Instant;

use super::{assert_no_overlap, scripted_manager};

fn sut() -> Route {
    Route::relayed(
        "sut",
        Hop::jump("bastion", Credentials::user("ops")),
        Hop::target("sut-1", Credentials::user("root")),
    )
}

#[tokio::test(start_paused = true)]
async fn concurrent_execs_run_one_at_a_time_in_submission_order() {
    let transport = ScriptedTransport::new().with_latency(Duration::from_millis(50));
    let manager = scripted_manager(&transport, 3);
    let session = manager.connect(sut()).await.unwrap();

    let started = Instant::now();
    let mut tasks = Vec::new();
    for i in 0..8u64 {
        let manager = manager.clone();
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(i)).await;
            manager
                .exec(&session, &format!("cmd-{i}"), Duration::from_secs(5))
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap().success());
    }

    assert_eq!(transport.max_concurrency(), 1);
    assert_no_overlap(&transport.exec_log());
    let expected: Vec<String> = (0..8).map(|i| format!("cmd-{i}")).collect();
    assert_eq!(transport.commands(), expected);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(400) && elapsed < Duration::from_millis(420));
}

#[tokio::test(start_paused = true)]
async fn timeout_while_queued_leaves_session_connected() {
    let transport = ScriptedTransport::new().with_latency(Duration::from_millis(200));
    let manager = scripted_manager(&transport, 3);
    let session = manager.connect(sut()).await.unwrap();

    let holder = {
        let manager = manager.clone();
        let session = session.clone();
        tokio::spawn(async move { manager.exec(&session, "long", Duration::from_secs(1)).await })
    };
    tokio::task::yield_now().await;

    let err = manager
        .exec(&session, "short", Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ExecTimeout { .. }));
    assert_eq!(session.state(), SessionState::Connected);
    assert!(holder.await.unwrap().is_ok());
    assert_eq!(transport.commands(), ["long"]);
}

#[tokio::test(start_paused = true)]
async fn lost_link_reconnects_with_new_generation() {
    let transport = ScriptedTransport::new();
    transport.respond("uptime", ScriptedReply::stdout("up 3 days"));
    let manager = scripted_manager(&transport, 3);
    let mut events = manager.subscribe();
    let session = manager.connect(sut()).await.unwrap();
    assert_eq!(session.generation(), 1);

    transport.break_links();
    let err = manager
        .exec(&session, "uptime", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.triggers_reconnect());

    let mut state = session.watch_state();
    state
        .wait_for(|s| *s == SessionState::Connected)
        .await
        .unwrap();

    let outcome = manager
        .exec(&session, "uptime", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(outcome.generation, 2);
    assert_eq!(outcome.stdout, "up 3 days");
    assert_eq!(transport.open_count(), 2);

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert!(
        kinds
            .iter()
            .any(|k| matches!(k, ConnectionEventKind::Connected { generation: 2 }))
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnects_end_in_fatal() {
    let transport = ScriptedTransport::new();
    let manager = scripted_manager(&transport, 2);
    let session = manager.connect(sut()).await.unwrap();

    transport.fail_opens(10);
    transport.break_links();
    let _ = manager.exec(&session, "true", Duration::from_secs(1)).await;

    let mut state = session.watch_state();
    state.wait_for(|s| *s == SessionState::Fatal).await.unwrap();

    let err = manager
        .exec(&session, "true", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ConnectionFatal { attempts: 2, .. }));
    assert!(err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn keepalive_probe_failure_triggers_reconnect() {
    let transport = ScriptedTransport::new();
    let manager = ConnectionManager::new(
        Arc::new(transport.clone()),
        ConnectionSettings::default().with_keepalive(KeepaliveConfig {
            enabled: true,
            interval_ms: 1_000,
            probe_timeout_ms: 200,
        }),
    );
    let session = manager.connect(sut()).await.unwrap();

    transport.set_probe_failing(true);
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    transport.set_probe_failing(false);

    let mut state = session.watch_state();
    tokio::time::timeout(
        Duration::from_secs(30),
        state.wait_for(|s| *s == SessionState::Connected && session.generation() == 2),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(transport.probe_count() >= 1);
    manager.disconnect(&session).await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_stops_everything() {
    let transport = ScriptedTransport::new();
    let manager = scripted_manager(&transport, 3);
    let session = manager.connect(sut()).await.unwrap();

    manager.disconnect(&session).await;
    manager.disconnect(&session).await;

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(
        manager
            .exec(&session, "true", Duration::from_secs(1))
            .await
            .unwrap_err(),
        SessionError::Disconnected
    );
    assert_eq!(
        manager.reconnect(&session, session.generation()).await,
        Err(SessionError::Disconnected)
    );
}

#[tokio::test(start_paused = true)]
async fn jump_hop_failure_is_named_and_frees_the_route() {
    let transport = ScriptedTransport::new();
    transport.fail_opens(1);
    transport.fail_hop(0);
    let manager = scripted_manager(&transport, 3);

    let err = manager.connect(sut()).await.unwrap_err();
    assert_eq!(
        err,
        SessionError::ConnectFailed {
            hop: 0,
            host: "bastion".into(),
            cause: "scripted connect failure".into(),
        }
    );
    assert!(manager.active_session(&sut()).is_none());

    let session = manager.connect(sut()).await.unwrap();
    assert!(matches!(
        manager.connect(sut()).await,
        Err(SessionError::RouteInUse { session_id, .. }) if session_id == session.id()
    ));
    manager.disconnect(&session).await;
}

#[tokio::test]
async fn local_route_runs_commands_on_this_machine() {
    let manager = ConnectionManager::new(
        Arc::new(LocalTransport),
        ConnectionSettings::default().with_keepalive(KeepaliveConfig::disabled()),
    );
    let session = manager.connect(Route::local()).await.unwrap();
    assert!(session.route().is_local());

    let outcome = manager
        .exec(&session, "echo linkwatch", Duration::from_secs(5))
        .await
        .unwrap();
    assert!(outcome.success());
    assert_eq!(outcome.stdout.trim(), "linkwatch");
    manager.disconnect(&session).await;
}
