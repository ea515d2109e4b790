//! Sampling classes and the commands each class runs
//!
//! A [`ProbeCatalog`] maps every [`SamplingClass`] to its metric probes.
//! Each probe carries its command template and its parser, fixed when the
//! catalog is built.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::CommandTemplate;

use super::parser::{CounterParser, NumberParser, PatternCountParser, SampleParser};
use super::settings::{MetricCommand, ParserKind, SamplingSettings};

/// Placeholder replaced by the interface name
pub const INTERFACE_PLACEHOLDER: &str = "interface";

/// Independent polling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingClass {
    /// Slow, broad link counters
    LowResolution,
    /// Fast throughput counters
    HighResolution,
    /// Error and drop counters
    ErrorRate,
}

impl SamplingClass {
    /// Every class, in display order
    pub const ALL: [Self; 3] = [Self::LowResolution, Self::HighResolution, Self::ErrorRate];

    /// Configuration name of the class
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LowResolution => "low-resolution",
            Self::HighResolution => "high-resolution",
            Self::ErrorRate => "error-rate",
        }
    }
}

impl fmt::Display for SamplingClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "low-resolution" | "low" => Ok(Self::LowResolution),
            "high-resolution" | "high" => Ok(Self::HighResolution),
            "error-rate" | "errors" => Ok(Self::ErrorRate),
            other => Err(format!(
                "unknown sampling class '{other}' (expected low-resolution, high-resolution or error-rate)"
            )),
        }
    }
}

/// Errors building a probe catalog
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// A metric name is already taken
    ///
    /// Series are keyed by interface and metric, so a metric belongs to
    /// exactly one class.
    #[error("Metric '{metric}' is already defined for class {class}")]
    DuplicateMetric {
        /// Class that already owns the metric
        class: SamplingClass,
        /// Repeated metric name
        metric: String,
    },
    /// A probe pattern is not a valid regex
    #[error("Invalid pattern for metric '{metric}': {cause}")]
    InvalidPattern {
        /// Metric the pattern belongs to
        metric: String,
        /// Regex compile error
        cause: String,
    },
    /// `pattern_count` parser without a pattern
    #[error("Metric '{metric}' uses the pattern_count parser but has no pattern")]
    MissingPattern {
        /// Metric lacking a pattern
        metric: String,
    },
    /// The command template does not reference `{interface}`
    #[error("Command for metric '{metric}' does not use {{interface}}")]
    MissingPlaceholder {
        /// Metric with the bad template
        metric: String,
    },
}

/// One metric sampled by a class: its command and parser
#[derive(Clone)]
pub struct MetricProbe {
    metric: String,
    template: CommandTemplate,
    parser: Arc<dyn SampleParser>,
}

impl MetricProbe {
    /// Creates a probe
    pub fn new(
        metric: impl Into<String>,
        template: impl Into<CommandTemplate>,
        parser: impl SampleParser + 'static,
    ) -> Self {
        Self {
            metric: metric.into(),
            template: template.into(),
            parser: Arc::new(parser),
        }
    }

    /// Metric name
    #[must_use]
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Command template
    #[must_use]
    pub const fn template(&self) -> &CommandTemplate {
        &self.template
    }

    /// Parser for the command output
    #[must_use]
    pub fn parser(&self) -> &dyn SampleParser {
        self.parser.as_ref()
    }

    /// Command text for `interface`
    #[must_use]
    pub fn command_for(&self, interface: &str) -> String {
        self.template.render(&[(INTERFACE_PLACEHOLDER, interface)])
    }

    fn from_command(entry: &MetricCommand) -> Result<Self, CatalogError> {
        let template = CommandTemplate::new(entry.command.clone());
        if !template.uses(INTERFACE_PLACEHOLDER) {
            return Err(CatalogError::MissingPlaceholder {
                metric: entry.metric.clone(),
            });
        }

        let pattern = entry
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| CatalogError::InvalidPattern {
                metric: entry.metric.clone(),
                cause: e.to_string(),
            })?;

        let parser: Arc<dyn SampleParser> = match (entry.parser, pattern) {
            (ParserKind::Number, _) => Arc::new(NumberParser),
            (ParserKind::Counters, None) => Arc::new(CounterParser::new()),
            (ParserKind::Counters, Some(filter)) => Arc::new(CounterParser::filtered(filter)),
            (ParserKind::PatternCount, Some(pattern)) => Arc::new(PatternCountParser::new(pattern)),
            (ParserKind::PatternCount, None) => {
                return Err(CatalogError::MissingPattern {
                    metric: entry.metric.clone(),
                });
            }
        };

        Ok(Self {
            metric: entry.metric.clone(),
            template,
            parser,
        })
    }
}

impl fmt::Debug for MetricProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricProbe")
            .field("metric", &self.metric)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

/// Probes of every sampling class
#[derive(Debug, Clone, Default)]
pub struct ProbeCatalog {
    probes: BTreeMap<SamplingClass, Vec<MetricProbe>>,
}

impl ProbeCatalog {
    /// Catalog with no probes
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in probes for Linux hosts
    ///
    /// - low-resolution: `link_counters` from `ethtool -S`
    /// - high-resolution: `rx_bytes` from sysfs
    /// - error-rate: `error_counters`, the error/drop/discard part of `ethtool -S`
    #[must_use]
    pub fn defaults() -> Self {
        let error_filter = Regex::new("(?i)(err|drop|discard)")
            .map(CounterParser::filtered)
            .unwrap_or_default();

        let mut probes = BTreeMap::new();
        probes.insert(
            SamplingClass::LowResolution,
            vec![MetricProbe::new(
                "link_counters",
                "ethtool -S {interface}",
                CounterParser::new(),
            )],
        );
        probes.insert(
            SamplingClass::HighResolution,
            vec![MetricProbe::new(
                "rx_bytes",
                "cat /sys/class/net/{interface}/statistics/rx_bytes",
                NumberParser,
            )],
        );
        probes.insert(
            SamplingClass::ErrorRate,
            vec![MetricProbe::new(
                "error_counters",
                "ethtool -S {interface}",
                error_filter,
            )],
        );
        Self { probes }
    }

    /// Defaults with the command overrides of `settings` applied
    ///
    /// An override replaces the default probe of the same class and metric
    /// and is added otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] for an invalid override, two overrides of
    /// the same metric, or a metric already owned by another class.
    pub fn from_settings(settings: &SamplingSettings) -> Result<Self, CatalogError> {
        let mut catalog = Self::defaults();
        let mut seen: Vec<&str> = Vec::new();

        for entry in &settings.commands {
            let owner = catalog.owner(&entry.metric);
            if seen.contains(&entry.metric.as_str()) || owner.is_some_and(|c| c != entry.class) {
                return Err(CatalogError::DuplicateMetric {
                    class: owner.unwrap_or(entry.class),
                    metric: entry.metric.clone(),
                });
            }
            seen.push(entry.metric.as_str());

            let probe = MetricProbe::from_command(entry)?;
            let probes = catalog.probes.entry(entry.class).or_default();
            probes.retain(|p| p.metric != entry.metric);
            probes.push(probe);
        }
        Ok(catalog)
    }

    /// Adds a probe to `class`
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateMetric`] if any class already has a
    /// probe with the same metric name.
    pub fn with_probe(mut self, class: SamplingClass, probe: MetricProbe) -> Result<Self, CatalogError> {
        if let Some(owner) = self.owner(&probe.metric) {
            return Err(CatalogError::DuplicateMetric {
                class: owner,
                metric: probe.metric,
            });
        }
        self.probes.entry(class).or_default().push(probe);
        Ok(self)
    }

    /// Class that samples `metric`, if any
    #[must_use]
    pub fn owner(&self, metric: &str) -> Option<SamplingClass> {
        self.probes
            .iter()
            .find(|(_, probes)| probes.iter().any(|p| p.metric == metric))
            .map(|(class, _)| *class)
    }

    /// Probes of `class`
    #[must_use]
    pub fn probes(&self, class: SamplingClass) -> &[MetricProbe] {
        self.probes
            .get(&class)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Metric names of `class`
    #[must_use]
    pub fn metrics(&self, class: SamplingClass) -> Vec<&str> {
        self.probes(class).iter().map(MetricProbe::metric).collect()
    }
}
