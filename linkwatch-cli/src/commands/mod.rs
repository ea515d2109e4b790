//! Command handler modules for the CLI.

mod check;
mod completions;
mod config;
mod init;
mod sample;
mod scan;

use crate::cli::Commands;
use crate::error::CliError;
use crate::util::GlobalOptions;

/// Dispatch a CLI command to the appropriate handler.
pub fn dispatch(options: &GlobalOptions, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Check {
            route,
            command,
            timeout,
            ask_password,
            format,
        } => check::cmd_check(
            options,
            check::CheckParams {
                route,
                command: command.as_deref(),
                timeout,
                ask_password,
                format,
            },
        ),
        Commands::Sample {
            duration,
            interfaces,
            classes,
            ask_password,
            format,
        } => sample::cmd_sample(
            options,
            sample::SampleParams {
                duration,
                interfaces,
                classes,
                ask_password,
                format,
            },
        ),
        Commands::Scan {
            ports,
            toggle_limit,
            ask_password,
            format,
        } => scan::cmd_scan(options, ports, toggle_limit, ask_password, format),
        Commands::Config { check } => config::cmd_config(options, check),
        Commands::Init { force } => init::cmd_init(options, force),
        Commands::Completions { shell } => completions::cmd_completions(shell),
    }
}
