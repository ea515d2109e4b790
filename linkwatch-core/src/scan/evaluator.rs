//! Eye-scan verdicts
//!
//! An evaluator reads the output of the eye-scan command and decides whether
//! the attempt passed. Output it cannot read is a [`ParseError`], which the
//! scanner counts as a failed attempt.

use std::fmt;

use regex::Regex;
use serde::Serialize;

use crate::monitoring::{CounterParser, MetricValue, ParseError, SampleParser};

/// Result of one eye-scan evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Link quality is acceptable
    Pass,
    /// Link quality is not acceptable
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Turns eye-scan output into a [`Verdict`]
pub trait EyeScanEvaluator: Send + Sync {
    /// Evaluates one eye-scan output
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the output cannot be judged.
    fn evaluate(&self, output: &str) -> Result<Verdict, ParseError>;
}

impl<F> EyeScanEvaluator for F
where
    F: Fn(&str) -> Result<Verdict, ParseError> + Send + Sync,
{
    fn evaluate(&self, output: &str) -> Result<Verdict, ParseError> {
        self(output)
    }
}

/// Passes when the output matches a pattern
///
/// A fail pattern, when set, is checked first and wins.
#[derive(Debug, Clone)]
pub struct PatternVerdict {
    pass: Regex,
    fail: Option<Regex>,
}

impl PatternVerdict {
    /// Passes on any match of `pass`
    #[must_use]
    pub const fn new(pass: Regex) -> Self {
        Self { pass, fail: None }
    }

    /// Fails on any match of `fail`, regardless of `pass`
    #[must_use]
    pub fn with_fail(mut self, fail: Regex) -> Self {
        self.fail = Some(fail);
        self
    }
}

impl EyeScanEvaluator for PatternVerdict {
    fn evaluate(&self, output: &str) -> Result<Verdict, ParseError> {
        if output.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        if self.fail.as_ref().is_some_and(|re| re.is_match(output)) {
            return Ok(Verdict::Fail);
        }
        Ok(if self.pass.is_match(output) {
            Verdict::Pass
        } else {
            Verdict::Fail
        })
    }
}

/// Passes when a named `name: value` field reaches a minimum
///
/// Typical use is an eye-opening or margin figure reported per lane.
#[derive(Debug, Clone)]
pub struct ThresholdVerdict {
    field: String,
    minimum: f64,
}

impl ThresholdVerdict {
    /// Passes when `field >= minimum`
    #[must_use]
    pub fn new(field: impl Into<String>, minimum: f64) -> Self {
        Self {
            field: field.into(),
            minimum,
        }
    }
}

impl EyeScanEvaluator for ThresholdVerdict {
    fn evaluate(&self, output: &str) -> Result<Verdict, ParseError> {
        let value = CounterParser::new().parse(output)?;
        let MetricValue::Fields(fields) = value else {
            return Err(ParseError::Malformed("expected counter fields".to_string()));
        };
        let reading = fields.get(&self.field).copied().ok_or_else(|| {
            ParseError::Malformed(format!("field '{}' not found", self.field))
        })?;
        Ok(if reading >= self.minimum {
            Verdict::Pass
        } else {
            Verdict::Fail
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_verdict() {
        let eval = PatternVerdict::new(Regex::new(r"(?i)\bpass(ed)?\b").unwrap());
        assert_eq!(eval.evaluate("Eye scan: PASSED"), Ok(Verdict::Pass));
        assert_eq!(eval.evaluate("Eye scan: failed"), Ok(Verdict::Fail));
        assert_eq!(eval.evaluate(""), Err(ParseError::Empty));

        let eval = eval.with_fail(Regex::new("(?i)lane \\d+: fail").unwrap());
        assert_eq!(
            eval.evaluate("lane 0: pass\nlane 1: FAIL\n"),
            Ok(Verdict::Fail)
        );
    }

    #[test]
    fn test_threshold_verdict() {
        let eval = ThresholdVerdict::new("eye_height_mv", 40.0);
        assert_eq!(
            eval.evaluate("eye_height_mv: 52\neye_width_ps: 18\n"),
            Ok(Verdict::Pass)
        );
        assert_eq!(eval.evaluate("eye_height_mv: 12\n"), Ok(Verdict::Fail));
        assert!(matches!(
            eval.evaluate("eye_width_ps: 18\n"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_closure_evaluator() {
        let always = |_: &str| -> Result<Verdict, ParseError> { Ok(Verdict::Pass) };
        assert_eq!(always.evaluate("anything"), Ok(Verdict::Pass));
    }
}
