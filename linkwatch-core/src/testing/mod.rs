//! Route checks and test doubles.
//!
//! [`check_route`] verifies that a route can be established and that a
//! command runs on its far end. [`ScriptedTransport`] is an in-memory
//! transport for deterministic tests of sessions, workers and scans.

// Allow truncation for millisecond conversion - latencies won't exceed u64::MAX
#![allow(clippy::cast_possible_truncation)]

mod scripted;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionManager;
use crate::models::Route;

pub use scripted::{ExecRecord, ScriptedReply, ScriptedTransport};

/// Command used when no check command is given
pub const DEFAULT_CHECK_COMMAND: &str = "uname -a";

/// Result of checking one route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteCheck {
    /// Route name
    pub route: String,
    /// Whether the connection and the command succeeded
    pub success: bool,
    /// Time to establish the session in milliseconds
    pub connect_ms: Option<u64>,
    /// Time the check command took in milliseconds
    pub exec_ms: Option<u64>,
    /// Error message (if failed)
    pub error: Option<String>,
    /// Additional details about the check
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl RouteCheck {
    fn failure(route: &Route, error: impl Into<String>) -> Self {
        Self {
            route: route.name().to_string(),
            success: false,
            connect_ms: None,
            exec_ms: None,
            error: Some(error.into()),
            details: BTreeMap::new(),
        }
    }

    /// Adds a detail to the check result
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Returns true if the check succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.success
    }
}

/// Connects `route`, runs `command` once and disconnects
///
/// Never fails; problems are reported in the returned [`RouteCheck`].
pub async fn check_route(
    manager: &ConnectionManager,
    route: Route,
    command: &str,
    timeout: Duration,
) -> RouteCheck {
    let hops = route.len();
    let started = Instant::now();
    let session = match manager.connect(route.clone()).await {
        Ok(session) => session,
        Err(e) => return RouteCheck::failure(&route, e.to_string()).with_detail("hops", hops.to_string()),
    };
    let connect_ms = started.elapsed().as_millis() as u64;

    let started = Instant::now();
    let result = manager.exec(&session, command, timeout).await;
    let exec_ms = started.elapsed().as_millis() as u64;
    manager.disconnect(&session).await;

    let mut check = match result {
        Ok(outcome) if outcome.success() => RouteCheck {
            route: route.name().to_string(),
            success: true,
            connect_ms: Some(connect_ms),
            exec_ms: Some(exec_ms),
            error: None,
            details: BTreeMap::new(),
        }
        .with_detail("output", outcome.stdout.trim()),
        Ok(outcome) => {
            let mut check = RouteCheck::failure(
                &route,
                format!(
                    "'{command}' exited with {}: {}",
                    outcome
                        .exit_status
                        .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    outcome.stderr.trim()
                ),
            );
            check.connect_ms = Some(connect_ms);
            check
        }
        Err(e) => {
            let mut check = RouteCheck::failure(&route, e.to_string());
            check.connect_ms = Some(connect_ms);
            check
        }
    };
    check.details.insert("hops".to_string(), hops.to_string());
    check
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connection::{ConnectionSettings, KeepaliveConfig};
    use crate::models::{Credentials, Hop};

    fn manager(transport: &ScriptedTransport) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(transport.clone()),
            ConnectionSettings::default().with_keepalive(KeepaliveConfig::disabled()),
        )
    }

    fn route() -> Route {
        Route::relayed(
            "sut",
            Hop::jump("bastion", Credentials::user("ops")),
            Hop::target("sut-1", Credentials::user("root")),
        )
    }

    #[tokio::test]
    async fn test_check_route_success() {
        let transport = ScriptedTransport::new();
        transport.respond("uname", ScriptedReply::stdout("Linux sut-1\n"));

        let check = check_route(
            &manager(&transport),
            route(),
            DEFAULT_CHECK_COMMAND,
            Duration::from_secs(1),
        )
        .await;

        assert!(check.is_success());
        assert_eq!(check.details.get("output").map(String::as_str), Some("Linux sut-1"));
        assert_eq!(check.details.get("hops").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_check_route_failures() {
        let transport = ScriptedTransport::new();
        transport.fail_opens(1);
        let check = check_route(&manager(&transport), route(), "true", Duration::from_secs(1)).await;
        assert!(!check.is_success());
        assert!(check.connect_ms.is_none());

        transport.respond("false", ScriptedReply::exit(1, "nope"));
        let check = check_route(&manager(&transport), route(), "false", Duration::from_secs(1)).await;
        assert!(!check.is_success());
        assert!(check.connect_ms.is_some());
        assert!(check.error.unwrap().contains("nope"));
    }
}
