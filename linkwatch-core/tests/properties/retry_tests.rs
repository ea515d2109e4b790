//! Property tests for reconnect backoff

use linkwatch_core::connection::{Backoff, RetryConfig};
use proptest::prelude::*;

/// Strategy for generating valid retry configurations
fn retry_config_strategy() -> impl Strategy<Value = RetryConfig> {
    (
        0u32..12,          // max_attempts
        1u64..5_000,       // initial_delay_ms
        1_000u64..120_000, // max_delay_ms
        1.0f64..4.0,       // backoff_multiplier
        0.0f64..1.0,       // jitter
    )
        .prop_map(
            |(max_attempts, initial_delay_ms, max_delay_ms, backoff_multiplier, jitter)| {
                RetryConfig::new()
                    .with_max_attempts(max_attempts)
                    .with_initial_delay_ms(initial_delay_ms)
                    .with_max_delay_ms(max_delay_ms.max(initial_delay_ms))
                    .with_backoff_multiplier(backoff_multiplier)
                    .with_jitter(jitter)
            },
        )
}

proptest! {
    /// Property: base delay is always capped at max_delay_ms
    #[test]
    fn delay_never_exceeds_max(config in retry_config_strategy(), attempt in 0u32..20) {
        if let Some(delay) = config.delay_for_attempt(attempt) {
            prop_assert!(delay.as_millis() <= u128::from(config.max_delay_ms));
        }
    }

    /// Property: a backoff hands out exactly max_attempts delays
    #[test]
    fn backoff_is_bounded_by_max_attempts(config in retry_config_strategy()) {
        let mut backoff = Backoff::new(config.clone());
        let mut handed_out = 0u32;
        while backoff.next_delay().is_some() {
            handed_out += 1;
            prop_assert!(handed_out <= config.max_attempts);
        }
        prop_assert_eq!(handed_out, config.max_attempts);
        prop_assert!(backoff.is_exhausted());
    }

    /// Property: jittered delays never decrease and stay within the cap
    #[test]
    fn jittered_delays_are_monotonic_and_capped(config in retry_config_strategy()) {
        let mut backoff = Backoff::new(config.clone());
        let mut previous = std::time::Duration::ZERO;
        while let Some(delay) = backoff.next_delay() {
            prop_assert!(delay >= previous);
            prop_assert!(delay.as_millis() <= u128::from(config.max_delay_ms));
            previous = delay;
        }
    }

    /// Property: without jitter the backoff follows the configured curve
    #[test]
    fn no_jitter_matches_config(config in retry_config_strategy()) {
        let config = config.with_jitter(0.0);
        let mut backoff = Backoff::new(config.clone());
        for attempt in 0..config.max_attempts {
            prop_assert_eq!(backoff.next_delay(), config.delay_for_attempt(attempt));
        }
    }
}
