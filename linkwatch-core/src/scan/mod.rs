//! Port toggle and eye-scan sequencing
//!
//! Each switch port goes through toggle-off, a settle wait, toggle-on, a
//! stabilization wait and an eye-scan read, repeated up to the toggle limit
//! until the eye scan passes. Ports are scanned one at a time over a single
//! switch session.

mod evaluator;
mod machine;
mod result;
mod runner;
mod settings;

pub use evaluator::{EyeScanEvaluator, PatternVerdict, ThresholdVerdict, Verdict};
pub use machine::{PortMachine, ScanEvent, ScanState, TransitionError};
pub use result::{
    AttemptOutcome, AttemptTiming, PhaseTiming, PortScanResult, ScanOutcome, ScanReport,
};
pub use runner::PortScanner;
pub use settings::{
    DEFAULT_PASS_PATTERN, EvaluatorSettings, PORT_PLACEHOLDER, ScanConfig, ScanConfigError,
    ScanSettings, SwitchCommands,
};
