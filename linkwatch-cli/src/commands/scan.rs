//! Run the port toggle/eye-scan sequence on the switch.

use chrono::Local;
use linkwatch_core::PortId;
use linkwatch_core::scan::{PortScanResult, PortScanner, ScanOutcome, ScanReport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::OutputFormat;
use crate::error::CliError;
use crate::format::{Palette, print_json, truncate};
use crate::util::{GlobalOptions, connection_manager, load_config, prompt_passwords, runtime};

/// Scan command handler
pub fn cmd_scan(
    options: &GlobalOptions,
    ports: Vec<PortId>,
    toggle_limit: Option<u32>,
    ask_password: bool,
    format: OutputFormat,
) -> Result<(), CliError> {
    let mut config = load_config(options)?;
    if !ports.is_empty() {
        config.scan.ports = ports;
    }
    if let Some(limit) = toggle_limit {
        config.scan.toggle_limit = limit;
    }
    if ask_password {
        if let Some(switch) = config.switch.as_mut() {
            prompt_passwords(switch)?;
        }
    }
    let route = config.switch_route()?;
    let streaming = format == OutputFormat::Table && !options.quiet;
    let palette = Palette::new(options.color);

    let runtime = runtime()?;
    let report = runtime.block_on(async {
        let manager = connection_manager(&config);
        let session = manager.connect(route).await?;
        let scanner = PortScanner::from_settings(manager.clone(), session.clone(), &config.scan)
            .map_err(|e| CliError::Config(format!("[scan]: {e}")))?;
        if streaming {
            println!(
                "Scanning {} ports on {}...\n",
                scanner.config().ports.len(),
                session.route()
            );
        }

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        let handle = scanner.spawn(cancel.clone(), Some(tx));
        let mut interrupted = false;
        loop {
            tokio::select! {
                result = rx.recv() => match result {
                    Some(result) if streaming => print_result(&result, &palette),
                    Some(_) => {}
                    None => break,
                },
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    info!("Interrupted, cancelling scan");
                    interrupted = true;
                    cancel.cancel();
                }
            }
        }
        let report = handle
            .await
            .map_err(|e| CliError::Connection(format!("Scan task failed: {e}")))?;
        manager.disconnect(&session).await;
        Ok::<_, CliError>(report)
    })?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table if streaming => print_summary(&report, &palette),
        OutputFormat::Table => {}
    }

    if report.all_passed() {
        Ok(())
    } else {
        Err(CliError::ScanNotPassed(report.to_string()))
    }
}

/// Print a single port result with colors
fn print_result(result: &PortScanResult, palette: &Palette) {
    let Palette {
        green,
        red,
        yellow,
        cyan,
        bold,
        reset,
    } = *palette;
    let elapsed_ms: u64 = result.history.iter().map(|a| a.total_ms()).sum();

    match &result.outcome {
        ScanOutcome::Pass => print!("{green}{bold}✓{reset} {}", result.port),
        ScanOutcome::Fail { .. } => print!("{red}{bold}✗{reset} {}", result.port),
        ScanOutcome::Aborted { .. } => print!("{yellow}{bold}-{reset} {}", result.port),
    }
    print!(" {cyan}({} attempts, {elapsed_ms}ms){reset}", result.attempts);
    match &result.outcome {
        ScanOutcome::Pass => println!(),
        ScanOutcome::Fail { reason } | ScanOutcome::Aborted { reason } => {
            println!(" {yellow}- {}{reset}", truncate(reason, 80));
        }
    }
}

/// Print the scan summary with colors
fn print_summary(report: &ScanReport, palette: &Palette) {
    let Palette {
        green,
        red,
        yellow,
        bold,
        reset,
        ..
    } = *palette;

    println!();
    println!("{bold}Scan Summary:{reset}");
    if let Some(last) = report.results().last() {
        println!(
            "  Finished: {}",
            last.finished_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("  Total:   {}", report.len());
    println!("  {green}Passed:  {}{reset}", report.passed());
    if report.failed() > 0 {
        println!("  {red}Failed:  {}{reset}", report.failed());
    } else {
        println!("  Failed:  0");
    }
    if report.aborted() > 0 {
        println!("  {yellow}Aborted: {}{reset}", report.aborted());
    } else {
        println!("  Aborted: 0");
    }
}
