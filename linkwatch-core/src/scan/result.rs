//! Port-scan results

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::PortId;

use super::machine::ScanState;

/// Terminal outcome of a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ScanOutcome {
    /// An attempt passed the eye scan
    Pass,
    /// Every attempt failed
    Fail {
        /// Reason of the last failed attempt
        reason: String,
    },
    /// The session failed or the scan was cancelled
    Aborted {
        /// What ended the scan
        reason: String,
    },
}

impl ScanOutcome {
    /// Returns true for [`ScanOutcome::Pass`]
    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    /// Short label
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail { .. } => "fail",
            Self::Aborted { .. } => "aborted",
        }
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail { reason } => write!(f, "fail: {reason}"),
            Self::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

/// Time spent in one state of an attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTiming {
    /// State that was executed
    pub phase: ScanState,
    /// Elapsed time in milliseconds
    pub elapsed_ms: u64,
}

/// How one toggle attempt went
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum AttemptOutcome {
    /// Eye scan passed
    Passed,
    /// A command or the eye scan failed
    Failed {
        /// Failure reason
        reason: String,
    },
    /// Attempt interrupted
    Aborted {
        /// Interruption reason
        reason: String,
    },
}

/// Timing record of one toggle attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptTiming {
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Phases in execution order
    pub phases: Vec<PhaseTiming>,
    /// How the attempt ended
    pub outcome: AttemptOutcome,
}

impl AttemptTiming {
    /// Total elapsed milliseconds over all phases
    #[must_use]
    pub fn total_ms(&self) -> u64 {
        self.phases.iter().map(|p| p.elapsed_ms).sum()
    }
}

/// Terminal record of one scanned port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortScanResult {
    /// Scanned port
    pub port: PortId,
    /// Toggle attempts used (0 when never started)
    pub attempts: u32,
    /// Terminal outcome
    #[serde(flatten)]
    pub outcome: ScanOutcome,
    /// Per-attempt timings
    pub history: Vec<AttemptTiming>,
    /// When the port scan started
    pub started_at: DateTime<Utc>,
    /// When the port scan finished
    pub finished_at: DateTime<Utc>,
}

impl PortScanResult {
    /// Result for a port that was never started
    #[must_use]
    pub fn not_started(port: PortId, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            port,
            attempts: 0,
            outcome: ScanOutcome::Aborted {
                reason: reason.into(),
            },
            history: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Returns true when the port passed
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.outcome.is_pass()
    }
}

/// All port results of one scan run, in scan order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    results: Vec<PortScanResult>,
}

impl ScanReport {
    /// Empty report
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a port result
    pub fn push(&mut self, result: PortScanResult) {
        self.results.push(result);
    }

    /// Results in scan order
    #[must_use]
    pub fn results(&self) -> &[PortScanResult] {
        &self.results
    }

    /// Result for `port`
    #[must_use]
    pub fn get(&self, port: PortId) -> Option<&PortScanResult> {
        self.results.iter().find(|r| r.port == port)
    }

    /// Number of ports in the report
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if no port was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Ports that passed
    #[must_use]
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, ScanOutcome::Pass))
    }

    /// Ports that failed
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ScanOutcome::Fail { .. }))
    }

    /// Ports that were aborted
    #[must_use]
    pub fn aborted(&self) -> usize {
        self.count(|o| matches!(o, ScanOutcome::Aborted { .. }))
    }

    /// Returns true if every port passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(PortScanResult::passed)
    }

    fn count(&self, pred: impl Fn(&ScanOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ports: {} passed, {} failed, {} aborted",
            self.len(),
            self.passed(),
            self.failed(),
            self.aborted()
        )
    }
}
