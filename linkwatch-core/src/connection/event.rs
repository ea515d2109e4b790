//! Connection-state events published by the [`super::ConnectionManager`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Capacity of the broadcast channel carrying [`ConnectionEvent`]s
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What happened to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// A link is up; `generation` starts at 1 and grows on each reconnect
    Connected {
        /// Generation of the new link
        generation: u64,
    },
    /// The link failed and the session stopped serving commands
    Degraded {
        /// Why the link was dropped
        reason: String,
    },
    /// A reconnect attempt is scheduled
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// Reconnect attempts are exhausted
    Fatal {
        /// Last error seen while reconnecting
        reason: String,
    },
    /// The session was closed by its owner
    Disconnected,
}

/// Event tagged with the session it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Session the event belongs to
    pub session_id: Uuid,
    /// When the event was raised
    pub at: DateTime<Utc>,
    /// Event payload
    pub kind: ConnectionEventKind,
}

impl ConnectionEvent {
    /// Creates an event stamped with the current time
    #[must_use]
    pub fn new(session_id: Uuid, kind: ConnectionEventKind) -> Self {
        Self {
            session_id,
            at: Utc::now(),
            kind,
        }
    }

    /// Returns true for [`ConnectionEventKind::Fatal`]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind, ConnectionEventKind::Fatal { .. })
    }
}
