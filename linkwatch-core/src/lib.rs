//! `linkwatch` Core Library
//!
//! Remote-session and sampling engine behind the `linkwatch` CLI: it runs
//! vendor diagnostic commands over chained SSH sessions, samples their
//! output at several cadences and drives port toggle/eye-scan sequences on
//! a switch under test.
//!
//! # Crate Structure
//!
//! - [`models`] - Routes, hops, switch port ids and command templates
//! - [`connection`] - Session establishment, serialized exec, keepalive and reconnect
//! - [`monitoring`] - Sampling workers, parsers and bounded sample series
//! - [`work`] - Worker lifecycle across interfaces and sampling classes
//! - [`scan`] - Port toggle/eye-scan state machine and scanner
//! - [`config`] - `linkwatch.toml` loading and validation
//! - [`testing`] - Route checks and a scripted in-memory transport
//! - [`tracing`] - Subscriber setup and span/field names

// Enable missing_docs warning for public API documentation
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod error;
pub mod models;
pub mod monitoring;
pub mod scan;
pub mod testing;
pub mod tracing;
pub mod work;

// Flat re-exports of the types most callers need.

pub use config::{ConfigError, ConfigManager, ConfigResult, LinkwatchConfig, RouteSettings};
pub use connection::{
    CommandOutcome, ConnectionEvent, ConnectionEventKind, ConnectionManager, ConnectionSettings,
    KeepaliveConfig, RetryConfig, Session, SessionError, SessionResult, SessionState, Transport,
};
pub use error::{LinkwatchError, Result};
pub use models::{CommandTemplate, Credentials, Hop, PortId, Route};
pub use monitoring::{
    MetricValue, ProbeCatalog, Sample, SampleData, SamplingClass, SamplingSettings, SeriesKey,
    SeriesSnapshot,
};
pub use scan::{PortScanResult, PortScanner, ScanOutcome, ScanReport, ScanSettings, ScanState};
pub use work::{StopSummary, WorkError, WorkManager, WorkResult, WorkStatus};
