//! Sampling settings (stored in `linkwatch.toml` under `[sampling]`)

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::probe::SamplingClass;
use super::series::DEFAULT_SERIES_CAPACITY;

const fn default_low_resolution_ms() -> u64 {
    5_000
}

const fn default_high_resolution_ms() -> u64 {
    1_000
}

const fn default_error_rate_ms() -> u64 {
    10_000
}

const fn default_series_capacity() -> usize {
    DEFAULT_SERIES_CAPACITY
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_exec_timeout_ms() -> u64 {
    5_000
}

/// Shortest allowed sampling interval
pub const MIN_INTERVAL_MS: u64 = 50;

/// Longest allowed sampling interval (one hour)
pub const MAX_INTERVAL_MS: u64 = 3_600_000;

/// Command override for one metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricCommand {
    /// Sampling class running the metric
    pub class: SamplingClass,
    /// Metric name, unique within the class
    pub metric: String,
    /// Command template; `{interface}` is replaced per worker
    pub command: String,
    /// Parser used for the output
    #[serde(default)]
    pub parser: ParserKind,
    /// Regex for the `counters` (name filter) and `pattern_count` parsers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Built-in parser names usable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// First number of the output
    #[default]
    Number,
    /// `name: value` counters
    Counters,
    /// Count of lines matching `pattern`
    PatternCount,
}

/// Settings for interface sampling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingSettings {
    /// Interfaces to sample
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Sampling classes to run (default: all)
    #[serde(default = "default_classes")]
    pub classes: Vec<SamplingClass>,
    /// Low-resolution interval in milliseconds (default: 5000)
    #[serde(default = "default_low_resolution_ms")]
    pub low_resolution_ms: u64,
    /// High-resolution interval in milliseconds (default: 1000)
    #[serde(default = "default_high_resolution_ms")]
    pub high_resolution_ms: u64,
    /// Error-rate interval in milliseconds (default: 10000)
    #[serde(default = "default_error_rate_ms")]
    pub error_rate_ms: u64,
    /// Samples kept per series (default: 600)
    #[serde(default = "default_series_capacity")]
    pub series_capacity: usize,
    /// Consecutive failures before a worker asks for a reconnect (default: 3)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Timeout of one sampling command in milliseconds (default: 5000)
    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,
    /// Replacement commands, keyed by class and metric
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<MetricCommand>,
}

fn default_classes() -> Vec<SamplingClass> {
    SamplingClass::ALL.to_vec()
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            classes: default_classes(),
            low_resolution_ms: default_low_resolution_ms(),
            high_resolution_ms: default_high_resolution_ms(),
            error_rate_ms: default_error_rate_ms(),
            series_capacity: default_series_capacity(),
            failure_threshold: default_failure_threshold(),
            exec_timeout_ms: default_exec_timeout_ms(),
            commands: Vec::new(),
        }
    }
}

impl SamplingSettings {
    /// Interval of `class`, clamped to 50ms..=1h
    #[must_use]
    pub fn interval(&self, class: SamplingClass) -> Duration {
        let ms = match class {
            SamplingClass::LowResolution => self.low_resolution_ms,
            SamplingClass::HighResolution => self.high_resolution_ms,
            SamplingClass::ErrorRate => self.error_rate_ms,
        };
        Duration::from_millis(ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS))
    }

    /// Intervals of every class, for display
    #[must_use]
    pub fn intervals(&self) -> BTreeMap<SamplingClass, Duration> {
        SamplingClass::ALL
            .into_iter()
            .map(|class| (class, self.interval(class)))
            .collect()
    }

    /// Exec timeout, at least 10ms
    #[must_use]
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms.max(10))
    }

    /// Failure threshold, at least 1
    #[must_use]
    pub fn effective_failure_threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }

    /// Series capacity, at least 1
    #[must_use]
    pub fn effective_series_capacity(&self) -> usize {
        self.series_capacity.max(1)
    }

    /// Sets every interval at once
    #[must_use]
    pub const fn with_intervals(mut self, low_ms: u64, high_ms: u64, error_ms: u64) -> Self {
        self.low_resolution_ms = low_ms;
        self.high_resolution_ms = high_ms;
        self.error_rate_ms = error_ms;
        self
    }

    /// Sets the interfaces to sample
    #[must_use]
    pub fn with_interfaces<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = interfaces.into_iter().map(Into::into).collect();
        self
    }
}
