//! Bounded sample history per (interface, metric)
//!
//! Every [`SeriesStore`] belongs to one work manager; nothing here is
//! shared between instances. Each series has exactly one [`SeriesWriter`]
//! (its worker) and any number of readers, which only ever get copies.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::parser::MetricValue;

/// Default number of samples kept per series
pub const DEFAULT_SERIES_CAPACITY: usize = 600;

/// Payload of a sample: a parsed value or the reason there is none
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleData {
    /// Parsed value
    Value(MetricValue),
    /// Exec or parse failure
    Error(String),
}

/// One observation of a metric on an interface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// When the command that produced it started
    pub timestamp: DateTime<Utc>,
    /// Interface name
    pub interface: String,
    /// Metric name
    pub metric: String,
    /// Value or error marker
    pub data: SampleData,
}

impl Sample {
    /// Sample carrying a value
    #[must_use]
    pub fn value(
        timestamp: DateTime<Utc>,
        interface: impl Into<String>,
        metric: impl Into<String>,
        value: MetricValue,
    ) -> Self {
        Self {
            timestamp,
            interface: interface.into(),
            metric: metric.into(),
            data: SampleData::Value(value),
        }
    }

    /// Sample marking a failed observation
    #[must_use]
    pub fn error(
        timestamp: DateTime<Utc>,
        interface: impl Into<String>,
        metric: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            interface: interface.into(),
            metric: metric.into(),
            data: SampleData::Error(reason.into()),
        }
    }

    /// Returns true for error-marked samples
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.data, SampleData::Error(_))
    }

    /// Parsed value, `None` for error samples
    #[must_use]
    pub const fn metric_value(&self) -> Option<&MetricValue> {
        match &self.data {
            SampleData::Value(v) => Some(v),
            SampleData::Error(_) => None,
        }
    }
}

/// Append-only FIFO of samples holding at most `capacity` entries
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSeries {
    capacity: usize,
    samples: VecDeque<Sample>,
    evicted: u64,
}

impl SampleSeries {
    /// Creates an empty series; a zero capacity is raised to 1
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity.min(1024)),
            evicted: 0,
        }
    }

    /// Appends `sample`, evicting the oldest entry when full
    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
            self.evicted += 1;
        }
        self.samples.push_back(sample);
    }

    /// Maximum number of samples kept
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples held
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true when nothing was recorded (or everything was cleared)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples dropped to stay within capacity
    #[must_use]
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Samples in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Most recent `n` samples, oldest first
    #[must_use]
    pub fn latest(&self, n: usize) -> Vec<Sample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }

    /// Samples taken at or after `since`, oldest first
    #[must_use]
    pub fn since(&self, since: DateTime<Utc>) -> Vec<Sample> {
        self.samples
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect()
    }
}

/// Identifies one series
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SeriesKey {
    /// Interface name
    pub interface: String,
    /// Metric name
    pub metric: String,
}

impl SeriesKey {
    /// Creates a key
    #[must_use]
    pub fn new(interface: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            metric: metric.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.interface, self.metric)
    }
}

/// Point-in-time copy of a series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    /// Series the copy was taken from
    pub key: SeriesKey,
    /// Capacity of the series
    pub capacity: usize,
    /// Samples dropped before the copy was taken
    pub evicted: u64,
    /// Samples, oldest first
    pub samples: Vec<Sample>,
}

impl SeriesSnapshot {
    fn of(key: &SeriesKey, series: &SampleSeries) -> Self {
        Self {
            key: key.clone(),
            capacity: series.capacity(),
            evicted: series.evicted(),
            samples: series.iter().cloned().collect(),
        }
    }

    /// Number of samples in the copy
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true when the copy holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent `n` samples, oldest first
    #[must_use]
    pub fn latest(&self, n: usize) -> &[Sample] {
        &self.samples[self.samples.len().saturating_sub(n)..]
    }

    /// Samples taken at or after `since`
    pub fn since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(move |s| s.timestamp >= since)
    }

    /// Most recent sample
    #[must_use]
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Number of error-marked samples
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_error()).count()
    }
}

type SharedSeries = Arc<RwLock<SampleSeries>>;

/// Per-owner collection of series
#[derive(Debug)]
pub struct SeriesStore {
    capacity: usize,
    series: RwLock<BTreeMap<SeriesKey, SharedSeries>>,
}

impl SeriesStore {
    /// Creates an empty store whose series hold `capacity` samples each
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: RwLock::new(BTreeMap::new()),
        }
    }

    /// Capacity of every series in this store
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the writer for `key`, creating the series if needed
    #[must_use]
    pub fn writer(&self, key: SeriesKey) -> SeriesWriter {
        let mut map = self.series.write().unwrap_or_else(PoisonError::into_inner);
        let series = map
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(SampleSeries::new(self.capacity))));
        SeriesWriter {
            key,
            series: Arc::clone(series),
        }
    }

    /// Copy of one series
    #[must_use]
    pub fn snapshot(&self, key: &SeriesKey) -> Option<SeriesSnapshot> {
        let map = self.series.read().unwrap_or_else(PoisonError::into_inner);
        let series = map.get(key)?;
        let series = series.read().unwrap_or_else(PoisonError::into_inner);
        Some(SeriesSnapshot::of(key, &series))
    }

    /// Copies of every series, ordered by key
    #[must_use]
    pub fn snapshots(&self) -> Vec<SeriesSnapshot> {
        let map = self.series.read().unwrap_or_else(PoisonError::into_inner);
        map.iter()
            .map(|(key, series)| {
                let series = series.read().unwrap_or_else(PoisonError::into_inner);
                SeriesSnapshot::of(key, &series)
            })
            .collect()
    }

    /// Copies of every series of `interface`
    #[must_use]
    pub fn snapshots_for(&self, interface: &str) -> Vec<SeriesSnapshot> {
        self.snapshots()
            .into_iter()
            .filter(|s| s.key.interface == interface)
            .collect()
    }

    /// Keys of every series
    #[must_use]
    pub fn keys(&self) -> Vec<SeriesKey> {
        let map = self.series.read().unwrap_or_else(PoisonError::into_inner);
        map.keys().cloned().collect()
    }

    /// Number of series
    #[must_use]
    pub fn len(&self) -> usize {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true when the store holds no series
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every series
    pub fn clear(&self) {
        self.series
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// The single writer of one series
#[derive(Debug)]
pub struct SeriesWriter {
    key: SeriesKey,
    series: SharedSeries,
}

impl SeriesWriter {
    /// Series this writer appends to
    #[must_use]
    pub const fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// Appends one sample
    pub fn append(&self, sample: Sample) {
        self.series
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }
}
