//! `linkwatch` CLI - remote interface sampling and switch port scans
//!
//! Provides commands for checking routes, sampling interface counters for a
//! fixed duration, running toggle/eye-scan sequences on a switch and
//! managing the configuration file.

mod cli;
mod commands;
mod error;
mod format;
mod util;

use clap::Parser;
use cli::Cli;

fn main() {
    let cli = Cli::parse();
    let options = util::GlobalOptions::from(&cli);

    let result = commands::dispatch(&options, cli.command);

    if let Err(e) = result {
        if !options.quiet {
            eprintln!("Error: {e}");
        }
        std::process::exit(e.exit_code());
    }
}
