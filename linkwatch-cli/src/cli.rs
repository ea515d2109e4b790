//! CLI argument parsing types using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use linkwatch_core::{PortId, SamplingClass};

/// `linkwatch` command-line interface for sampling links and scanning switch ports
#[derive(Parser)]
#[command(name = "linkwatch")]
#[command(author, version, about = "Remote interface sampling and switch port scans")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "LINKWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a configured route and run one command
    #[command(about = "Check that a configured route connects and runs a command")]
    Check {
        /// Route to check
        #[arg(value_enum, default_value = "target")]
        route: RouteArg,

        /// Command to run once connected (default: uname -a)
        #[arg(long)]
        command: Option<String>,

        /// Command timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Prompt for passwords of hops without credentials
        #[arg(long)]
        ask_password: bool,

        /// Output format
        #[arg(short, long, default_value = "table", value_enum)]
        format: OutputFormat,
    },

    /// Sample interfaces on the target for a fixed time
    #[command(about = "Sample interface counters on the target and print a summary")]
    Sample {
        /// How long to sample, in seconds
        #[arg(short, long, default_value = "60")]
        duration: u64,

        /// Interface to sample (repeatable; default: from configuration)
        #[arg(short, long = "interface", value_name = "NAME")]
        interfaces: Vec<String>,

        /// Sampling class (repeatable; default: from configuration)
        #[arg(short = 'C', long = "class", value_name = "CLASS")]
        classes: Vec<SamplingClass>,

        /// Prompt for passwords of hops without credentials
        #[arg(long)]
        ask_password: bool,

        /// Output format
        #[arg(short, long, default_value = "table", value_enum)]
        format: OutputFormat,
    },

    /// Toggle switch ports and evaluate their eye scans
    #[command(about = "Run the port toggle/eye-scan sequence on the switch")]
    Scan {
        /// Port to scan, e.g. 1/7 or 1/7:2 (repeatable; default: from configuration)
        #[arg(short, long = "port", value_name = "PORT")]
        ports: Vec<PortId>,

        /// Toggle attempts per port (overrides the configuration)
        #[arg(long)]
        toggle_limit: Option<u32>,

        /// Prompt for passwords of hops without credentials
        #[arg(long)]
        ask_password: bool,

        /// Output format
        #[arg(short, long, default_value = "table", value_enum)]
        format: OutputFormat,
    },

    /// Print the effective configuration
    #[command(about = "Print the effective configuration with secrets redacted")]
    Config {
        /// Only validate, print nothing on success
        #[arg(long)]
        check: bool,
    },

    /// Write a commented configuration file
    #[command(about = "Create a default configuration file")]
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    #[command(about = "Generate shell completion scripts")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Which configured route a command targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RouteArg {
    /// The sampled host from `[target]`
    Target,
    /// The switch from `[switch]`
    Switch,
    /// Every configured route
    All,
}

/// Output format for reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Display as formatted table
    Table,
    /// Output as JSON
    Json,
}
