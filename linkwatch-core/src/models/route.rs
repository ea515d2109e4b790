//! Hop and route definitions for reaching a command target.

use std::fmt;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Longest hop chain a route may contain
pub const MAX_HOPS: usize = 8;

/// Errors raised while assembling a route
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    /// A hop has an empty host name
    #[error("Hop {0} has an empty host")]
    EmptyHost(usize),

    /// A jump hop was placed after the target, or the last hop is not a target
    #[error("Hop {index} has role {role} but must be {expected}")]
    MisplacedRole {
        /// Hop index within the route
        index: usize,
        /// Role found on the hop
        role: HopRole,
        /// Role required at that position
        expected: HopRole,
    },

    /// The chain is longer than [`MAX_HOPS`]
    #[error("Route has {0} hops, at most {MAX_HOPS} are supported")]
    TooManyHops(usize),
}

/// Position of a hop within a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopRole {
    /// Relay used only to reach the next hop
    Jump,
    /// Host that executes commands
    Target,
}

impl fmt::Display for HopRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jump => write!(f, "jump"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// Authentication material for one hop
///
/// The password is held as a [`SecretString`] so it never shows up in
/// `Debug` output or logs.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Login user (falls back to the local ssh configuration when `None`)
    pub username: Option<String>,
    /// Password used through `sshpass`
    pub password: Option<SecretString>,
    /// Private key passed with `-i`
    pub identity_file: Option<PathBuf>,
}

impl Credentials {
    /// Credentials with only a user name
    #[must_use]
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    /// Adds a password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Adds an identity file
    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }
}

/// One network/authentication leg of a route
#[derive(Debug, Clone)]
pub struct Hop {
    /// Host name or address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Authentication for this leg
    pub credentials: Credentials,
    /// Jump relay or final target
    pub role: HopRole,
}

impl Hop {
    /// Creates a target hop on the default port
    #[must_use]
    pub fn target(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            credentials,
            role: HopRole::Target,
        }
    }

    /// Creates a jump hop on the default port
    #[must_use]
    pub fn jump(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            role: HopRole::Jump,
            ..Self::target(host, credentials)
        }
    }

    /// Sets the port
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `[user@]host` destination as understood by `ssh`
    #[must_use]
    pub fn destination(&self) -> String {
        match &self.credentials.username {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination())?;
        if self.port != DEFAULT_SSH_PORT {
            write!(f, ":{}", self.port)?;
        }
        Ok(())
    }
}

/// Identity of the endpoint chain a route reaches
///
/// Two routes with the same hosts, ports and users in the same order share a
/// key, whatever their names and credentials. The local route has an empty
/// chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey(Vec<(String, u16, Option<String>)>);

/// Ordered chain of hops leading to the command target
///
/// Zero hops means commands run locally, one hop is a direct connection,
/// and longer chains relay through every hop but the last.
#[derive(Debug, Clone)]
pub struct Route {
    name: String,
    hops: Vec<Hop>,
}

impl Route {
    /// Builds a route, checking that only the last hop is a target
    ///
    /// # Errors
    ///
    /// Returns a [`RouteError`] for empty hosts, misplaced roles or chains
    /// longer than [`MAX_HOPS`].
    pub fn new(name: impl Into<String>, hops: Vec<Hop>) -> Result<Self, RouteError> {
        if hops.len() > MAX_HOPS {
            return Err(RouteError::TooManyHops(hops.len()));
        }
        let last = hops.len().saturating_sub(1);
        for (index, hop) in hops.iter().enumerate() {
            if hop.host.trim().is_empty() {
                return Err(RouteError::EmptyHost(index));
            }
            let expected = if index == last {
                HopRole::Target
            } else {
                HopRole::Jump
            };
            if hop.role != expected {
                return Err(RouteError::MisplacedRole {
                    index,
                    role: hop.role,
                    expected,
                });
            }
        }
        Ok(Self {
            name: name.into(),
            hops,
        })
    }

    /// Route that executes commands on the local machine
    #[must_use]
    pub fn local() -> Self {
        Self {
            name: "local".to_string(),
            hops: Vec::new(),
        }
    }

    /// Single-hop route
    #[must_use]
    pub fn direct(name: impl Into<String>, mut target: Hop) -> Self {
        target.role = HopRole::Target;
        Self {
            name: name.into(),
            hops: vec![target],
        }
    }

    /// Two-hop route relayed through `jump`
    #[must_use]
    pub fn relayed(name: impl Into<String>, mut jump: Hop, mut target: Hop) -> Self {
        jump.role = HopRole::Jump;
        target.role = HopRole::Target;
        Self {
            name: name.into(),
            hops: vec![jump, target],
        }
    }

    /// Human-readable route name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All hops in connection order
    #[must_use]
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Number of hops
    #[must_use]
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Returns true for the zero-hop local route
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.hops.is_empty()
    }

    /// Key under which at most one session may be active
    #[must_use]
    pub fn key(&self) -> RouteKey {
        RouteKey(
            self.hops
                .iter()
                .map(|hop| (hop.host.clone(), hop.port, hop.credentials.username.clone()))
                .collect(),
        )
    }

    /// Hop that executes commands
    #[must_use]
    pub fn target(&self) -> Option<&Hop> {
        self.hops.last()
    }

    /// Relay hops in front of the target
    #[must_use]
    pub fn jumps(&self) -> &[Hop] {
        match self.hops.split_last() {
            Some((_, jumps)) => jumps,
            None => &[],
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hops.is_empty() {
            return write!(f, "local");
        }
        let chain: Vec<String> = self.hops.iter().map(ToString::to_string).collect();
        write!(f, "{}", chain.join(" -> "))
    }
}
