//! Sample interfaces on the target for a fixed duration.

use std::time::Duration;

use linkwatch_core::{
    SampleData, SamplingClass, SeriesSnapshot, StopSummary, WorkManager, WorkStatus,
};
use serde::Serialize;
use tracing::info;

use crate::cli::OutputFormat;
use crate::error::CliError;
use crate::format::{Palette, print_json, render_table, truncate};
use crate::util::{GlobalOptions, connection_manager, load_config, prompt_passwords, runtime};

/// Parameters of the sample command
pub struct SampleParams {
    pub duration: u64,
    pub interfaces: Vec<String>,
    pub classes: Vec<SamplingClass>,
    pub ask_password: bool,
    pub format: OutputFormat,
}

/// Everything a sampling run produced
#[derive(Debug, Serialize)]
struct SampleReport {
    status: WorkStatus,
    duration_s: u64,
    interrupted: bool,
    workers: StopSummary,
    series: Vec<SeriesSnapshot>,
}

/// Sample command handler
pub fn cmd_sample(options: &GlobalOptions, params: SampleParams) -> Result<(), CliError> {
    let mut config = load_config(options)?;
    if !params.interfaces.is_empty() {
        config.sampling.interfaces = params.interfaces;
    }
    if !params.classes.is_empty() {
        config.sampling.classes = params.classes;
    }
    if config.sampling.interfaces.is_empty() {
        return Err(CliError::Usage(
            "no interfaces to sample; pass --interface or set sampling.interfaces".to_string(),
        ));
    }
    if params.ask_password {
        prompt_passwords(&mut config.target)?;
    }
    let route = config.target_route()?;
    let duration = Duration::from_secs(params.duration.max(1));

    let runtime = runtime()?;
    let report = runtime.block_on(async {
        let manager = connection_manager(&config);
        let session = manager.connect(route).await?;
        let mut work =
            WorkManager::from_settings(manager.clone(), session.clone(), config.sampling.clone())?;
        work.start_configured()?;

        let mut status = work.watch_status();
        let interrupted = tokio::select! {
            () = tokio::time::sleep(duration) => false,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping workers");
                true
            }
            _ = status.wait_for(|s| matches!(s, WorkStatus::Fatal { .. })) => false,
        };

        let workers = work.stop().await;
        let report = SampleReport {
            status: work.status(),
            duration_s: duration.as_secs(),
            interrupted,
            workers,
            series: work.all_series(),
        };
        manager.disconnect(&session).await;
        Ok::<_, CliError>(report)
    })?;

    match params.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table if !options.quiet => print_report(&report, &Palette::new(options.color)),
        OutputFormat::Table => {}
    }

    match report.status {
        WorkStatus::Fatal { reason } => Err(CliError::Connection(reason)),
        _ => Ok(()),
    }
}

fn print_report(report: &SampleReport, palette: &Palette) {
    let rows: Vec<Vec<String>> = report
        .series
        .iter()
        .map(|series| {
            let last = series.last().map_or_else(String::new, |sample| match &sample.data {
                SampleData::Value(value) => truncate(&value.to_string(), 40),
                SampleData::Error(reason) => format!("error: {}", truncate(reason, 33)),
            });
            vec![
                series.key.interface.clone(),
                series.key.metric.clone(),
                series.len().to_string(),
                series.error_count().to_string(),
                last,
            ]
        })
        .collect();

    print!(
        "{}",
        render_table(&["INTERFACE", "METRIC", "SAMPLES", "ERRORS", "LAST"], &rows)
    );
    println!();

    let Palette {
        green, red, bold, reset, ..
    } = *palette;
    match &report.status {
        WorkStatus::Fatal { reason } => println!("{red}{bold}Session failed:{reset} {reason}"),
        _ if report.interrupted => println!("{bold}Interrupted{reset}"),
        _ => println!(
            "{green}{bold}Sampled for {}s{reset} ({} workers stopped)",
            report.duration_s,
            report.workers.stopped + report.workers.ended_early + report.workers.aborted
        ),
    }
}
