//! Work manager and workers sharing one session

use std::time::Duration;

use linkwatch_core::connection::ConnectionManager;
use linkwatch_core::models::Route;
use linkwatch_core::monitoring::{
    MetricProbe, NumberParser, ProbeCatalog, SamplingClass, SamplingSettings,
};
use linkwatch_core::testing::{ScriptedReply, ScriptedTransport};
use linkwatch_core::work::{WorkError, WorkManager, WorkStatus};
use tokio::time::Instant;

use super::{assert_no_overlap, scripted_manager};

/// One probe per class: `slow` at low resolution, `fast` at high resolution
fn catalog() -> ProbeCatalog {
    ProbeCatalog::empty()
        .with_probe(
            SamplingClass::LowResolution,
            MetricProbe::new("slow", "slow {interface}", NumberParser),
        )
        .unwrap()
        .with_probe(
            SamplingClass::HighResolution,
            MetricProbe::new("fast", "fast {interface}", NumberParser),
        )
        .unwrap()
}

async fn work_manager(
    transport: &ScriptedTransport,
    settings: SamplingSettings,
) -> (ConnectionManager, WorkManager) {
    let manager = scripted_manager(transport, 3);
    let session = manager.connect(Route::local()).await.unwrap();
    let work = WorkManager::new(manager.clone(), session, settings, catalog());
    (manager, work)
}

#[tokio::test(start_paused = true)]
async fn two_cadences_share_the_session_without_overlap() {
    let transport = ScriptedTransport::new().with_latency(Duration::from_millis(10));
    transport.respond("slow", ScriptedReply::stdout("1"));
    transport.respond("fast", ScriptedReply::stdout("2"));
    let (_, mut work) = work_manager(
        &transport,
        SamplingSettings::default().with_intervals(500, 100, 10_000),
    )
    .await;

    work.start(
        &["eth0"],
        &[SamplingClass::LowResolution, SamplingClass::HighResolution],
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    work.stop().await;

    let slow = transport.count_matching("slow eth0");
    let fast = transport.count_matching("fast eth0");
    assert!((2..=3).contains(&slow), "slow ran {slow} times");
    assert!((9..=11).contains(&fast), "fast ran {fast} times");
    assert!((11..=14).contains(&(slow + fast)));
    assert_eq!(transport.max_concurrency(), 1);
    assert_no_overlap(&transport.exec_log());

    let series = work.series("eth0", "fast").unwrap();
    assert!(series.samples.iter().all(|s| !s.is_error()));
    assert_eq!(work.status(), WorkStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn duplicate_start_keeps_a_single_worker() {
    let transport = ScriptedTransport::new();
    let (_, mut work) = work_manager(&transport, SamplingSettings::default()).await;

    work.start(&["eth0"], &[SamplingClass::HighResolution]).unwrap();
    let err = work
        .start(&["eth0"], &[SamplingClass::HighResolution])
        .unwrap_err();

    assert_eq!(
        err,
        WorkError::DuplicateWorker {
            interface: "eth0".into(),
            class: SamplingClass::HighResolution,
        }
    );
    assert_eq!(work.workers().len(), 1);
    work.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_mid_cycle_is_bounded_and_final() {
    let transport = ScriptedTransport::new().with_latency(Duration::from_millis(300));
    transport.respond("fast", ScriptedReply::stdout("5"));
    let settings = SamplingSettings {
        exec_timeout_ms: 1_000,
        ..SamplingSettings::default().with_intervals(500, 100, 10_000)
    };
    let (_, mut work) = work_manager(&transport, settings).await;

    work.start(&["eth0"], &[SamplingClass::HighResolution]).unwrap();
    tokio::time::sleep(Duration::from_millis(450)).await;

    let stop_started = Instant::now();
    let summary = work.stop().await;
    // worst case: one running command plus the interval
    assert!(stop_started.elapsed() <= Duration::from_millis(1_100));
    assert_eq!(summary.aborted, 0);
    assert_eq!(work.running_workers(), 0);

    let len = work.series("eth0", "fast").map_or(0, |s| s.len());
    let commands = transport.exec_log().len();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(work.series("eth0", "fast").map_or(0, |s| s.len()), len);
    assert_eq!(transport.exec_log().len(), commands);
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_request_a_reconnect() {
    let transport = ScriptedTransport::new();
    transport.respond("fast", ScriptedReply::exit(1, "No such device"));
    let settings = SamplingSettings {
        failure_threshold: 3,
        ..SamplingSettings::default().with_intervals(500, 100, 10_000)
    };
    let (_, mut work) = work_manager(&transport, settings).await;
    let session = work.session().cloned().unwrap();

    work.start(&["eth9"], &[SamplingClass::HighResolution]).unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(transport.open_count(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(session.generation() >= 2);
    assert!(transport.open_count() >= 2);
    assert_eq!(work.status(), WorkStatus::Running);

    let series = work.series("eth9", "fast").unwrap();
    assert!(series.error_count() >= 3);
    work.stop().await;
}

#[tokio::test(start_paused = true)]
async fn fatal_session_is_reported_once_and_needs_rebind() {
    let transport = ScriptedTransport::new();
    transport.respond("fast", ScriptedReply::stdout("7"));
    let (manager, mut work) = work_manager(
        &transport,
        SamplingSettings::default().with_intervals(500, 100, 10_000),
    )
    .await;
    let mut status = work.watch_status();

    work.start(&["eth0", "eth1"], &[SamplingClass::HighResolution])
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    transport.fail_opens(100);
    transport.break_links();

    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| matches!(s, WorkStatus::Fatal { .. })),
    )
    .await
    .unwrap()
    .unwrap();

    let err = work
        .start(&["eth2"], &[SamplingClass::HighResolution])
        .unwrap_err();
    assert!(matches!(err, WorkError::SessionFatal(_)));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(work.running_workers(), 0);

    // fatal is terminal; only an explicit rebind restarts sampling
    transport.fail_opens(0);
    let session = manager.connect(Route::local()).await.unwrap();
    assert_eq!(work.rebind(session.clone()).await, Err(WorkError::Busy));

    let summary = work.stop().await;
    assert_eq!(summary.ended_early, 2);
    assert!(matches!(work.status(), WorkStatus::Fatal { .. }));

    work.rebind(session).await.unwrap();
    assert_eq!(work.status(), WorkStatus::Idle);
    let started = work
        .start(&["eth0"], &[SamplingClass::HighResolution])
        .unwrap();
    assert_eq!(started.len(), 1);
    work.stop().await;
}
