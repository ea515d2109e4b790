//! Parsers turning raw command output into sample values
//!
//! A parser is picked per metric when the probe catalog is built, so a
//! worker never inspects output to decide how to read it. The built-in
//! parsers cover plain numbers (`/sys/class/net/*/statistics/*`),
//! `name: value` counter listings (`ethtool -S`, `mlxlink -c`) and line
//! counts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Errors produced while parsing command output
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Nothing to parse
    #[error("Command produced no output")]
    Empty,
    /// The output did not contain the expected value
    #[error("Failed to parse output: {0}")]
    Malformed(String),
}

/// Parsed value of one sample
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// A single number
    Number(f64),
    /// Named numeric fields, e.g. one per driver counter
    Fields(BTreeMap<String, f64>),
    /// Free text kept as-is
    Text(String),
}

impl MetricValue {
    /// The value as a number, if it is one
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// A named field of a `Fields` value
    #[must_use]
    pub fn field(&self, name: &str) -> Option<f64> {
        match self {
            Self::Fields(fields) => fields.get(name).copied(),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Fields(fields) => write!(f, "{} fields", fields.len()),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

/// Turns raw stdout into a [`MetricValue`]
pub trait SampleParser: Send + Sync {
    /// Parses one command's standard output
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the output does not hold the value.
    fn parse(&self, output: &str) -> Result<MetricValue, ParseError>;
}

impl<F> SampleParser for F
where
    F: Fn(&str) -> Result<MetricValue, ParseError> + Send + Sync,
{
    fn parse(&self, output: &str) -> Result<MetricValue, ParseError> {
        self(output)
    }
}

/// First number in a text, including exponent notation
static NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?")
        .expect("NUMBER_REGEX is a valid regex pattern")
});

/// One `name: value` counter line
static COUNTER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([^:]+?)\s*:\s*([-+]?\d+(?:\.\d+)?)\s*$")
        .expect("COUNTER_REGEX is a valid regex pattern")
});

/// Reads the first number in the output
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberParser;

impl SampleParser for NumberParser {
    fn parse(&self, output: &str) -> Result<MetricValue, ParseError> {
        if output.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        let token = NUMBER_REGEX
            .find(output)
            .ok_or_else(|| ParseError::Malformed(format!("no number in '{}'", snippet(output))))?;
        token
            .as_str()
            .parse::<f64>()
            .map(MetricValue::Number)
            .map_err(|e| ParseError::Malformed(e.to_string()))
    }
}

/// Collects `name: value` lines into a field map
///
/// Lines without a numeric value (section headers, banners) are skipped.
/// With a filter, only counters whose name matches it are kept.
#[derive(Debug, Clone, Default)]
pub struct CounterParser {
    filter: Option<Regex>,
}

impl CounterParser {
    /// Keeps every counter
    #[must_use]
    pub const fn new() -> Self {
        Self { filter: None }
    }

    /// Keeps counters whose name matches `filter`
    #[must_use]
    pub fn filtered(filter: Regex) -> Self {
        Self {
            filter: Some(filter),
        }
    }
}

impl SampleParser for CounterParser {
    fn parse(&self, output: &str) -> Result<MetricValue, ParseError> {
        if output.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        let fields: BTreeMap<String, f64> = output
            .lines()
            .filter_map(|line| COUNTER_REGEX.captures(line))
            .filter_map(|caps| {
                let name = caps.get(1)?.as_str().to_string();
                let value = caps.get(2)?.as_str().parse::<f64>().ok()?;
                Some((name, value))
            })
            .filter(|(name, _)| self.filter.as_ref().is_none_or(|f| f.is_match(name)))
            .collect();

        if fields.is_empty() {
            return Err(ParseError::Malformed(format!(
                "no counters in '{}'",
                snippet(output)
            )));
        }
        Ok(MetricValue::Fields(fields))
    }
}

/// Counts the output lines matching a pattern
#[derive(Debug, Clone)]
pub struct PatternCountParser {
    pattern: Regex,
}

impl PatternCountParser {
    /// Counts lines matching `pattern`
    #[must_use]
    pub const fn new(pattern: Regex) -> Self {
        Self { pattern }
    }
}

impl SampleParser for PatternCountParser {
    fn parse(&self, output: &str) -> Result<MetricValue, ParseError> {
        let count = output
            .lines()
            .filter(|line| self.pattern.is_match(line))
            .count();
        Ok(MetricValue::Number(count as f64))
    }
}

/// First line of `output`, shortened for error messages
fn snippet(output: &str) -> String {
    let line = output.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    line.chars().take(60).collect()
}
