//! Port scans over the scripted switch

use std::time::Duration;

use linkwatch_core::connection::{ConnectionManager, Session};
use linkwatch_core::models::{Credentials, Hop, PortId, Route};
use linkwatch_core::monitoring::{
    MetricProbe, NumberParser, ProbeCatalog, SamplingClass, SamplingSettings,
};
use linkwatch_core::scan::{PortScanner, ScanOutcome, ScanSettings, SwitchCommands};
use linkwatch_core::testing::{ScriptedReply, ScriptedTransport};
use linkwatch_core::work::WorkManager;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{assert_no_overlap, scripted_manager};

fn settings(ports: Vec<PortId>, toggle_limit: u32) -> ScanSettings {
    ScanSettings {
        ports,
        toggle_limit,
        scan_interval_ms: 250,
        toggle_wait_ms: 100,
        eye_scan_wait_ms: 200,
        command_timeout_ms: 1_000,
        commands: SwitchCommands {
            toggle_off: "shutdown {port}".into(),
            toggle_on: "no shutdown {port}".into(),
            eye_scan: "show eye {port}".into(),
        },
        ..ScanSettings::default()
    }
}

async fn switch(transport: &ScriptedTransport) -> (ConnectionManager, Session) {
    let manager = scripted_manager(transport, 2);
    let route = Route::relayed(
        "switch",
        Hop::jump("lab-gw", Credentials::user("ops")),
        Hop::target("leaf-3", Credentials::user("admin")),
    );
    let session = manager.connect(route).await.unwrap();
    (manager, session)
}

#[tokio::test(start_paused = true)]
async fn failing_eye_scan_uses_every_attempt() {
    let transport = ScriptedTransport::new();
    transport.respond("show eye", ScriptedReply::stdout("eye opening: FAIL"));
    let (manager, session) = switch(&transport).await;
    let scanner =
        PortScanner::from_settings(manager, session, &settings(vec![PortId::new(1, 7)], 4))
            .unwrap();

    let report = scanner.run(&CancellationToken::new(), None).await;

    let result = report.get(PortId::new(1, 7)).unwrap();
    assert_eq!(result.attempts, 4);
    assert!(matches!(result.outcome, ScanOutcome::Fail { .. }));
    assert_eq!(result.history.len(), 4);
    assert_eq!(transport.count_matching("show eye 1/7"), 4);
    assert_eq!(transport.count_matching("no shutdown 1/7"), 4);
    assert_eq!(report.failed(), 1);
    assert!(!report.all_passed());
}

#[tokio::test(start_paused = true)]
async fn pass_on_third_attempt_stops_toggling() {
    let transport = ScriptedTransport::new();
    transport.respond("show eye", ScriptedReply::stdout("eye opening: PASS"));
    transport.push_reply("show eye", ScriptedReply::stdout("eye opening: FAIL"));
    transport.push_reply("show eye", ScriptedReply::stdout("eye opening: FAIL"));
    let (manager, session) = switch(&transport).await;
    let scanner =
        PortScanner::from_settings(manager, session, &settings(vec![PortId::new(2, 1)], 5))
            .unwrap();

    let report = scanner.run(&CancellationToken::new(), None).await;

    let result = report.get(PortId::new(2, 1)).unwrap();
    assert_eq!(result.outcome, ScanOutcome::Pass);
    assert_eq!(result.attempts, 3);
    assert_eq!(transport.count_matching("shutdown 2/1"), 6);
    assert!(report.all_passed());
}

#[tokio::test(start_paused = true)]
async fn results_stream_one_record_per_port() {
    let transport = ScriptedTransport::new();
    transport.respond("show eye", ScriptedReply::stdout("PASS"));
    let ports = vec![PortId::new(1, 1), PortId::split(1, 2, 1), PortId::new(1, 3)];
    let (manager, session) = switch(&transport).await;
    let scanner =
        PortScanner::from_settings(manager, session, &settings(ports.clone(), 3)).unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let handle = scanner.spawn(CancellationToken::new(), Some(tx));
    let mut streamed = Vec::new();
    while let Some(result) = rx.recv().await {
        streamed.push(result.port);
    }
    let report = handle.await.unwrap();

    assert_eq!(streamed, ports);
    assert_eq!(report.len(), 3);
    assert_eq!(report.passed(), 3);
    assert_eq!(transport.count_matching("show eye 1/2:1"), 1);
}

#[tokio::test(start_paused = true)]
async fn scan_and_sampling_share_one_session() {
    let transport = ScriptedTransport::new().with_latency(Duration::from_millis(20));
    transport.respond("show eye", ScriptedReply::stdout("PASS"));
    transport.respond("crc", ScriptedReply::stdout("0"));
    let (manager, session) = switch(&transport).await;

    let catalog = ProbeCatalog::empty()
        .with_probe(
            SamplingClass::ErrorRate,
            MetricProbe::new("crc_errors", "crc {interface}", NumberParser),
        )
        .unwrap();
    let mut work = WorkManager::new(
        manager.clone(),
        session.clone(),
        SamplingSettings::default().with_intervals(1_000, 100, 150),
        catalog,
    );
    work.start(&["Ethernet1/1", "Ethernet1/2"], &[SamplingClass::ErrorRate])
        .unwrap();

    let scanner = PortScanner::from_settings(
        manager,
        session,
        &settings(vec![PortId::new(1, 1), PortId::new(1, 2)], 2),
    )
    .unwrap();
    let report = scanner.run(&CancellationToken::new(), None).await;
    work.stop().await;

    assert_eq!(report.passed(), 2);
    assert!(transport.count_matching("crc Ethernet1/") > 4);
    assert_eq!(transport.max_concurrency(), 1);
    assert_no_overlap(&transport.exec_log());
}

#[tokio::test(start_paused = true)]
async fn cancel_between_ports_aborts_the_rest() {
    let transport = ScriptedTransport::new();
    transport.respond("show eye", ScriptedReply::stdout("PASS"));
    let ports = vec![PortId::new(1, 1), PortId::new(1, 2), PortId::new(1, 3)];
    let (manager, session) = switch(&transport).await;
    let scanner = PortScanner::from_settings(manager, session, &settings(ports, 3)).unwrap();

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(8);
    let handle = scanner.spawn(cancel.clone(), Some(tx));
    let first = rx.recv().await.unwrap();
    assert!(first.passed());
    cancel.cancel();

    let report = handle.await.unwrap();
    assert_eq!(report.passed(), 1);
    assert_eq!(report.aborted(), 2);
    assert_eq!(transport.count_matching("1/2"), 0);
    assert_eq!(transport.count_matching("1/3"), 0);
}
