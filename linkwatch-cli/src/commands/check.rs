//! Check that configured routes connect and run a command.

use std::time::Duration;

use linkwatch_core::config::{LinkwatchConfig, RouteSettings};
use linkwatch_core::testing::{DEFAULT_CHECK_COMMAND, RouteCheck, check_route};

use crate::cli::{OutputFormat, RouteArg};
use crate::error::CliError;
use crate::format::{Palette, print_json};
use crate::util::{GlobalOptions, connection_manager, load_config, prompt_passwords, runtime};

/// Parameters of the check command
pub struct CheckParams<'a> {
    pub route: RouteArg,
    pub command: Option<&'a str>,
    pub timeout: u64,
    pub ask_password: bool,
    pub format: OutputFormat,
}

/// Check command handler
pub fn cmd_check(options: &GlobalOptions, params: CheckParams<'_>) -> Result<(), CliError> {
    let mut config = load_config(options)?;
    let selected = selected_routes(&config, params.route)?;
    if params.ask_password {
        for section in &selected {
            prompt_passwords(route_settings(&mut config, section))?;
        }
    }

    let mut routes = Vec::with_capacity(selected.len());
    for section in &selected {
        let route = match *section {
            "switch" => config.switch_route()?,
            _ => config.target_route()?,
        };
        routes.push(route);
    }

    let command = params.command.unwrap_or(DEFAULT_CHECK_COMMAND);
    let timeout = Duration::from_secs(params.timeout.max(1));
    let runtime = runtime()?;
    let results: Vec<RouteCheck> = runtime.block_on(async {
        let manager = connection_manager(&config);
        let mut results = Vec::with_capacity(routes.len());
        for route in routes {
            results.push(check_route(&manager, route, command, timeout).await);
        }
        results
    });

    match params.format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Table if !options.quiet => {
            let palette = Palette::new(options.color);
            for result in &results {
                print_check(result, &palette);
            }
        }
        OutputFormat::Table => {}
    }

    let failed: Vec<&RouteCheck> = results.iter().filter(|r| !r.is_success()).collect();
    match failed.as_slice() {
        [] => Ok(()),
        [only] => Err(CliError::CheckFailed(
            only.error.clone().unwrap_or_else(|| "Unknown error".to_string()),
        )),
        many => Err(CliError::CheckFailed(format!(
            "{} of {} routes failed",
            many.len(),
            results.len()
        ))),
    }
}

/// Section names the route argument refers to
fn selected_routes(config: &LinkwatchConfig, route: RouteArg) -> Result<Vec<&'static str>, CliError> {
    match route {
        RouteArg::Target => Ok(vec!["target"]),
        RouteArg::Switch if config.switch.is_some() => Ok(vec!["switch"]),
        RouteArg::Switch => Err(CliError::Config(
            "Missing [switch] section in configuration".to_string(),
        )),
        RouteArg::All if config.switch.is_some() => Ok(vec!["target", "switch"]),
        RouteArg::All => Ok(vec!["target"]),
    }
}

fn route_settings<'a>(config: &'a mut LinkwatchConfig, section: &str) -> &'a mut RouteSettings {
    match (section, config.switch.as_mut()) {
        ("switch", Some(switch)) => switch,
        _ => &mut config.target,
    }
}

/// Print a single check result with colors
fn print_check(result: &RouteCheck, palette: &Palette) {
    let Palette {
        green,
        red,
        yellow,
        cyan,
        bold,
        reset,
    } = *palette;

    if result.success {
        print!("{green}{bold}✓{reset} {}", result.route);
        if let (Some(connect), Some(exec)) = (result.connect_ms, result.exec_ms) {
            print!(" {cyan}(connect {connect}ms, exec {exec}ms){reset}");
        }
        if let Some(hops) = result.details.get("hops") {
            print!(" [{hops} hops]");
        }
        println!();
        if let Some(output) = result.details.get("output") {
            for line in output.lines() {
                println!("    {line}");
            }
        }
    } else {
        print!("{red}{bold}✗{reset} {}", result.route);
        if let Some(ref error) = result.error {
            print!(" {yellow}- {error}{reset}");
        }
        println!();
        for (key, value) in &result.details {
            println!("    {key}: {value}");
        }
    }
}
