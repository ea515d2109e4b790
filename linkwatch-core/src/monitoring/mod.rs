//! Multi-rate interface sampling
//!
//! One [`Worker`] per (interface, [`SamplingClass`]) polls diagnostic
//! commands through a shared session and appends parsed values to bounded
//! [`SampleSeries`]. Parsers are chosen per metric in the
//! [`ProbeCatalog`]; the work manager owns workers and series.

mod parser;
mod probe;
mod series;
mod settings;
pub mod worker;

pub use parser::{
    CounterParser, MetricValue, NumberParser, ParseError, PatternCountParser, SampleParser,
};
pub use probe::{CatalogError, INTERFACE_PLACEHOLDER, MetricProbe, ProbeCatalog, SamplingClass};
pub use series::{
    DEFAULT_SERIES_CAPACITY, Sample, SampleData, SampleSeries, SeriesKey, SeriesSnapshot,
    SeriesStore, SeriesWriter,
};
pub use settings::{MAX_INTERVAL_MS, MIN_INTERVAL_MS, MetricCommand, ParserKind, SamplingSettings};
pub use worker::{
    REPORT_CHANNEL_CAPACITY, Worker, WorkerConfig, WorkerExit, WorkerHandle, WorkerKey,
    WorkerReport,
};
