//! Toggle/eye-scan state machine of a single port
//!
//! The machine is pure: it performs no I/O and keeps no clock. The runner
//! executes whatever the current state asks for and feeds the outcome back
//! as a [`ScanEvent`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use super::evaluator::Verdict;

/// State of a port scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// Not started
    Idle,
    /// Toggle-off command pending
    ToggleOff,
    /// Waiting for the port to settle down
    WaitToggle,
    /// Toggle-on command pending
    ToggleOn,
    /// Waiting for the link to stabilize
    WaitEyeScan,
    /// Eye-scan read and verdict pending
    Evaluate,
    /// Terminal: an attempt passed
    Pass,
    /// Terminal: every attempt failed
    Fail,
    /// Terminal: connection lost or cancelled
    Aborted,
}

impl ScanState {
    /// Returns true for `Pass`, `Fail` and `Aborted`
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Pass | Self::Fail | Self::Aborted)
    }

    /// Returns true for the two timed waits
    #[must_use]
    pub const fn is_wait(self) -> bool {
        matches!(self, Self::WaitToggle | Self::WaitEyeScan)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ToggleOff => "toggle-off",
            Self::WaitToggle => "wait-toggle",
            Self::ToggleOn => "toggle-on",
            Self::WaitEyeScan => "wait-eye-scan",
            Self::Evaluate => "evaluate",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Input to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Start the first attempt
    Begin,
    /// The pending switch command succeeded
    CommandOk,
    /// The pending command ran but failed, or its output was unreadable
    CommandFailed(String),
    /// The pending timed wait is over
    WaitElapsed,
    /// The eye scan was judged
    Verdict(Verdict),
    /// The switch session failed
    ConnectionLost(String),
    /// The scan was cancelled
    Cancelled,
}

impl fmt::Display for ScanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::CommandOk => write!(f, "command ok"),
            Self::CommandFailed(reason) => write!(f, "command failed ({reason})"),
            Self::WaitElapsed => write!(f, "wait elapsed"),
            Self::Verdict(verdict) => write!(f, "verdict {verdict}"),
            Self::ConnectionLost(reason) => write!(f, "connection lost ({reason})"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Rejected transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The machine already finished
    #[error("Port scan already finished in state {0}")]
    Terminal(ScanState),
    /// The event does not apply to the current state
    #[error("Event '{event}' is not valid in state {state}")]
    Unexpected {
        /// Current state
        state: ScanState,
        /// Rendered event
        event: String,
    },
}

/// State machine for one port
#[derive(Debug, Clone)]
pub struct PortMachine {
    state: ScanState,
    attempt: u32,
    limit: u32,
    last_failure: Option<String>,
    abort_reason: Option<String>,
}

impl PortMachine {
    /// New machine in `Idle`; a `limit` of zero is treated as one attempt
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            state: ScanState::Idle,
            attempt: 0,
            limit: limit.max(1),
            last_failure: None,
            abort_reason: None,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ScanState {
        self.state
    }

    /// Current attempt, starting at 1 once begun
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Toggle attempt limit
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Reason of the most recent failed attempt
    #[must_use]
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Reason for ending in `Aborted`
    #[must_use]
    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    /// Returns true once `Pass`, `Fail` or `Aborted` is reached
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Applies `event` and returns the new state
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the machine is terminal or the event
    /// does not belong to the current state. The state is left unchanged.
    pub fn handle(&mut self, event: ScanEvent) -> Result<ScanState, TransitionError> {
        use ScanState as S;

        if self.state.is_terminal() {
            return Err(TransitionError::Terminal(self.state));
        }

        let next = match (self.state, event) {
            (S::Idle, ScanEvent::Begin) => {
                self.attempt = 1;
                S::ToggleOff
            }
            (S::Idle, event) => return Err(self.unexpected(&event)),
            (_, ScanEvent::ConnectionLost(reason)) => {
                self.abort_reason = Some(reason);
                S::Aborted
            }
            (_, ScanEvent::Cancelled) => {
                self.abort_reason = Some("scan cancelled".to_string());
                S::Aborted
            }
            (S::ToggleOff, ScanEvent::CommandOk) => S::WaitToggle,
            (S::WaitToggle, ScanEvent::WaitElapsed) => S::ToggleOn,
            (S::ToggleOn, ScanEvent::CommandOk) => S::WaitEyeScan,
            (S::WaitEyeScan, ScanEvent::WaitElapsed) => S::Evaluate,
            (S::Evaluate, ScanEvent::Verdict(Verdict::Pass)) => S::Pass,
            (S::Evaluate, ScanEvent::Verdict(Verdict::Fail)) => {
                self.fail_attempt("eye scan failed".to_string())
            }
            (S::ToggleOff | S::ToggleOn | S::Evaluate, ScanEvent::CommandFailed(reason)) => {
                self.fail_attempt(reason)
            }
            (_, event) => return Err(self.unexpected(&event)),
        };

        self.state = next;
        Ok(next)
    }

    /// Forces `Aborted` from any non-terminal state
    ///
    /// Returns false when the machine had already finished.
    pub fn abort(&mut self, reason: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.abort_reason = Some(reason.into());
        self.state = ScanState::Aborted;
        true
    }

    fn fail_attempt(&mut self, reason: String) -> ScanState {
        self.last_failure = Some(reason);
        if self.attempt < self.limit {
            self.attempt += 1;
            ScanState::ToggleOff
        } else {
            ScanState::Fail
        }
    }

    fn unexpected(&self, event: &ScanEvent) -> TransitionError {
        TransitionError::Unexpected {
            state: self.state,
            event: event.to_string(),
        }
    }
}
