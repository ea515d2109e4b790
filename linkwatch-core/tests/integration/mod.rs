//! Integration test modules

mod sampling_tests;
mod scan_tests;
mod session_tests;

use std::sync::Arc;

use linkwatch_core::connection::{ConnectionManager, ConnectionSettings, KeepaliveConfig, RetryConfig};
use linkwatch_core::testing::{ExecRecord, ScriptedTransport};

/// Manager over `transport` with keepalive off and a short, jitter-free
/// reconnect policy
pub fn scripted_manager(transport: &ScriptedTransport, max_attempts: u32) -> ConnectionManager {
    ConnectionManager::new(
        Arc::new(transport.clone()),
        ConnectionSettings::default()
            .with_keepalive(KeepaliveConfig::disabled())
            .with_retry(
                RetryConfig::new()
                    .with_max_attempts(max_attempts)
                    .with_initial_delay_ms(100)
                    .with_max_delay_ms(400)
                    .with_jitter(0.0),
            ),
    )
}

/// Asserts that no two recorded commands ran at the same time
pub fn assert_no_overlap(log: &[ExecRecord]) {
    for pair in log.windows(2) {
        let finished = pair[0]
            .finished
            .unwrap_or_else(|| panic!("'{}' never finished", pair[0].command));
        assert!(
            finished <= pair[1].started,
            "'{}' overlapped '{}'",
            pair[0].command,
            pair[1].command
        );
    }
}
