//! Port-scan settings (stored in `linkwatch.toml` under `[scan]`)

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CommandTemplate, PortId};

use super::evaluator::{EyeScanEvaluator, PatternVerdict, ThresholdVerdict};

/// Placeholder replaced by the full port id (`1/7:2`)
pub const PORT_PLACEHOLDER: &str = "port";

/// Default eye-scan pass pattern
pub const DEFAULT_PASS_PATTERN: &str = r"(?i)\bpass(ed)?\b";

/// Errors turning settings into a [`ScanConfig`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanConfigError {
    /// No ports listed
    #[error("No ports to scan")]
    NoPorts,
    /// `toggle_limit` of zero
    #[error("toggle_limit must be at least 1")]
    ZeroToggleLimit,
    /// A command template lacks `{port}`
    #[error("The {command} command does not use {{port}}")]
    MissingPlaceholder {
        /// Which command (`toggle_off`, `toggle_on`, `eye_scan`)
        command: &'static str,
    },
    /// An evaluator pattern does not compile
    #[error("Invalid eye-scan pattern: {0}")]
    InvalidPattern(String),
}

const fn default_scan_interval_ms() -> u64 {
    1_000
}

const fn default_toggle_limit() -> u32 {
    3
}

const fn default_toggle_wait_ms() -> u64 {
    5_000
}

const fn default_eye_scan_wait_ms() -> u64 {
    10_000
}

const fn default_command_timeout_ms() -> u64 {
    30_000
}

/// Switch commands of one scan cycle; `{port}`, `{slot}`, `{port_number}`
/// and `{subport}` are substituted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchCommands {
    /// Takes the port down
    pub toggle_off: CommandTemplate,
    /// Brings the port back up
    pub toggle_on: CommandTemplate,
    /// Reads the eye-scan result
    pub eye_scan: CommandTemplate,
}

impl Default for SwitchCommands {
    fn default() -> Self {
        Self {
            toggle_off: CommandTemplate::new(
                "cli -h 'configure terminal' 'interface ethernet {port} shutdown'",
            ),
            toggle_on: CommandTemplate::new(
                "cli -h 'configure terminal' 'interface ethernet {port} no shutdown'",
            ),
            eye_scan: CommandTemplate::new("cli -h 'show interfaces ethernet {port} eye-opening'"),
        }
    }
}

impl SwitchCommands {
    fn validate(&self) -> Result<(), ScanConfigError> {
        for (command, template) in [
            ("toggle_off", &self.toggle_off),
            ("toggle_on", &self.toggle_on),
            ("eye_scan", &self.eye_scan),
        ] {
            if !template.uses(PORT_PLACEHOLDER) {
                return Err(ScanConfigError::MissingPlaceholder { command });
            }
        }
        Ok(())
    }

    /// Renders `template` for `port`
    #[must_use]
    pub fn render(template: &CommandTemplate, port: PortId) -> String {
        let full = port.to_string();
        let slot = port.slot.to_string();
        let number = port.port.to_string();
        let subport = port.subport.map(|s| s.to_string()).unwrap_or_default();
        template.render(&[
            (PORT_PLACEHOLDER, full.as_str()),
            ("slot", slot.as_str()),
            ("port_number", number.as_str()),
            ("subport", subport.as_str()),
        ])
    }
}

/// How eye-scan output is judged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluatorSettings {
    /// Pass when `pass` matches, unless `fail` matches
    Pattern {
        /// Pass pattern
        #[serde(default = "default_pass_pattern")]
        pass: String,
        /// Optional fail pattern that wins over `pass`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fail: Option<String>,
    },
    /// Pass when a `name: value` field reaches `minimum`
    Threshold {
        /// Field name
        field: String,
        /// Minimum passing value
        minimum: f64,
    },
}

fn default_pass_pattern() -> String {
    DEFAULT_PASS_PATTERN.to_string()
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self::Pattern {
            pass: default_pass_pattern(),
            fail: None,
        }
    }
}

impl EvaluatorSettings {
    /// Builds the evaluator
    ///
    /// # Errors
    ///
    /// Returns [`ScanConfigError::InvalidPattern`] for a bad regex.
    pub fn build(&self) -> Result<Arc<dyn EyeScanEvaluator>, ScanConfigError> {
        let compile =
            |p: &str| Regex::new(p).map_err(|e| ScanConfigError::InvalidPattern(e.to_string()));
        Ok(match self {
            Self::Pattern { pass, fail } => {
                let mut verdict = PatternVerdict::new(compile(pass)?);
                if let Some(fail) = fail {
                    verdict = verdict.with_fail(compile(fail)?);
                }
                Arc::new(verdict)
            }
            Self::Threshold { field, minimum } => {
                Arc::new(ThresholdVerdict::new(field.clone(), *minimum))
            }
        })
    }
}

/// Port-scan settings as written in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Ports to scan, in order
    #[serde(default)]
    pub ports: Vec<PortId>,
    /// Pause between two ports in milliseconds (default: 1000)
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Toggle attempts per port (default: 3)
    #[serde(default = "default_toggle_limit")]
    pub toggle_limit: u32,
    /// Wait after toggling off in milliseconds (default: 5000)
    #[serde(default = "default_toggle_wait_ms")]
    pub toggle_wait_ms: u64,
    /// Wait after toggling on, before the eye scan, in milliseconds (default: 10000)
    #[serde(default = "default_eye_scan_wait_ms")]
    pub eye_scan_wait_ms: u64,
    /// Timeout of every switch command in milliseconds (default: 30000)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Switch commands
    #[serde(default)]
    pub commands: SwitchCommands,
    /// Eye-scan evaluation
    #[serde(default)]
    pub evaluator: EvaluatorSettings,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            scan_interval_ms: default_scan_interval_ms(),
            toggle_limit: default_toggle_limit(),
            toggle_wait_ms: default_toggle_wait_ms(),
            eye_scan_wait_ms: default_eye_scan_wait_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            commands: SwitchCommands::default(),
            evaluator: EvaluatorSettings::default(),
        }
    }
}

impl ScanSettings {
    /// Validated, immutable scan configuration
    ///
    /// # Errors
    ///
    /// Returns [`ScanConfigError`] for an empty port list, a zero toggle
    /// limit or a command template without `{port}`.
    pub fn to_config(&self) -> Result<ScanConfig, ScanConfigError> {
        if self.ports.is_empty() {
            return Err(ScanConfigError::NoPorts);
        }
        if self.toggle_limit == 0 {
            return Err(ScanConfigError::ZeroToggleLimit);
        }
        self.commands.validate()?;

        Ok(ScanConfig {
            ports: self.ports.clone(),
            scan_interval: Duration::from_millis(self.scan_interval_ms),
            toggle_limit: self.toggle_limit,
            toggle_wait: Duration::from_millis(self.toggle_wait_ms),
            eye_scan_wait: Duration::from_millis(self.eye_scan_wait_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms.max(100)),
            commands: self.commands.clone(),
        })
    }
}

/// Read-only scan configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Ports in scan order
    pub ports: Vec<PortId>,
    /// Pause between two ports
    pub scan_interval: Duration,
    /// Toggle attempts per port, at least 1
    pub toggle_limit: u32,
    /// Wait after toggle-off
    pub toggle_wait: Duration,
    /// Wait after toggle-on
    pub eye_scan_wait: Duration,
    /// Timeout of every switch command
    pub command_timeout: Duration,
    /// Switch commands
    pub commands: SwitchCommands,
}
