//! Reconnect backoff with exponential growth and jitter
//!
//! [`RetryConfig`] describes the policy; [`Backoff`] walks it for one
//! recovery sequence and hands out the delay before each reconnect attempt.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default maximum number of reconnect attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first reconnect attempt in milliseconds
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

/// Default maximum delay between attempts in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default backoff multiplier (delay doubles each attempt)
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default jitter ratio (up to +25% of the base delay)
pub const DEFAULT_JITTER: f64 = 0.25;

/// Reconnect policy
///
/// The base delay for attempt `n` (0-indexed) is
/// `min(initial_delay * multiplier^n, max_delay)`; jitter adds up to
/// `jitter * base` on top, still capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of reconnect attempts before the session is fatal
    pub max_attempts: u32,
    /// Delay before the first attempt in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for any delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff (values below 1.0 act as 1.0)
    pub backoff_multiplier: f64,
    /// Random extra delay as a fraction of the base delay (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryConfig {
    /// Creates a retry configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that never reconnects
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Sets the maximum number of reconnect attempts
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay
    #[must_use]
    pub const fn with_initial_delay_ms(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    /// Sets the maximum delay
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    /// Sets the backoff multiplier
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter ratio
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Base delay (without jitter) for a given attempt number (0-indexed)
    ///
    /// Returns `None` once `attempt` reaches `max_attempts`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let multiplier = self.backoff_multiplier.max(1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay_ms as f64 * multiplier.powi(exponent);
        let capped_delay_ms = if delay_ms.is_finite() {
            (delay_ms as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };

        Some(Duration::from_millis(capped_delay_ms))
    }

    /// Returns whether another reconnect attempt is allowed
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Jitter ratio clamped to `0.0..=1.0`
    #[must_use]
    pub fn effective_jitter(&self) -> f64 {
        if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// State of one reconnect sequence
///
/// Delays handed out by [`Backoff::next_delay`] never decrease, even when
/// jitter would draw a smaller value than the previous attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
    last_delay: Duration,
    last_error: Option<String>,
}

impl Backoff {
    /// Starts a new sequence for `config`
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last_delay: Duration::ZERO,
            last_error: None,
        }
    }

    /// Number of delays handed out so far
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Returns true once every allowed attempt has been used
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        !self.config.should_retry(self.attempt)
    }

    /// Delay to wait before the next attempt, or `None` when exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        let base = self.config.delay_for_attempt(self.attempt)?;
        let jitter = self.config.effective_jitter();
        let extra_ms = if jitter > 0.0 {
            let span = (base.as_millis() as f64 * jitter) as u64;
            rand::thread_rng().gen_range(0..=span)
        } else {
            0
        };
        let max = Duration::from_millis(self.config.max_delay_ms);
        let jittered = (base + Duration::from_millis(extra_ms)).min(max.max(base));
        let delay = jittered.max(self.last_delay);

        self.attempt += 1;
        self.last_delay = delay;
        Some(delay)
    }

    /// Records why the latest attempt failed
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Message of the latest failure
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Policy driving this sequence
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }
}
