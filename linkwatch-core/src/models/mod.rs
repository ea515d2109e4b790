//! Core data structures shared by the session, sampling and scan layers.

mod port;
mod route;
mod template;

pub use port::{PortId, PortIdError};
pub use route::{Credentials, DEFAULT_SSH_PORT, Hop, HopRole, MAX_HOPS, Route, RouteError, RouteKey};
pub use template::CommandTemplate;
