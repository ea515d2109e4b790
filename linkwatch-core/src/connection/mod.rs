//! Route/session layer
//!
//! [`ConnectionManager`] turns a [`crate::models::Route`] into a [`Session`]
//! through a [`Transport`], runs commands on it strictly one at a time and
//! keeps it alive: keepalive probes, reconnects with backoff, and a final
//! `Fatal` state once the retry policy is exhausted.

mod error;
mod event;
mod hops;
mod keepalive;
mod local;
mod manager;
mod retry;
mod session;
mod settings;
mod ssh;
mod transport;

pub use error::{SessionError, SessionResult};
pub use event::{ConnectionEvent, ConnectionEventKind, EVENT_CHANNEL_CAPACITY};
pub use local::{LocalChannel, LocalTransport};
pub use manager::ConnectionManager;
pub use retry::{
    Backoff, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS, DEFAULT_JITTER,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS, RetryConfig,
};
pub use session::{CommandOutcome, Session, SessionState};
pub use settings::{ConnectionSettings, KeepaliveConfig};
pub use ssh::{DEFAULT_CONNECT_TIMEOUT_SECS, OpenSshTransport};
pub use transport::{Channel, ChannelOutput, Transport};
