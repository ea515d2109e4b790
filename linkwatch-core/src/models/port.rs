//! Switch port addressing in `<slot>/<port>[:<subport>]` form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing a port identifier
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortIdError {
    /// Input did not follow `<slot>/<port>[:<subport>]`
    #[error("Invalid port '{0}', expected <slot>/<port>[:<subport>]")]
    Format(String),

    /// A component was not a valid number
    #[error("Invalid {component} in port '{input}'")]
    Component {
        /// Which part failed (`slot`, `port` or `subport`)
        component: &'static str,
        /// The full input
        input: String,
    },
}

/// Identifier of a switch port, e.g. `1/7` or `1/7:2` for a split port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortId {
    /// Line card / slot number
    pub slot: u16,
    /// Port number on the slot
    pub port: u16,
    /// Breakout lane for split ports
    pub subport: Option<u16>,
}

impl PortId {
    /// Creates an unsplit port id
    #[must_use]
    pub const fn new(slot: u16, port: u16) -> Self {
        Self {
            slot,
            port,
            subport: None,
        }
    }

    /// Creates a split port id
    #[must_use]
    pub const fn split(slot: u16, port: u16, subport: u16) -> Self {
        Self {
            slot,
            port,
            subport: Some(subport),
        }
    }
}

fn parse_component(
    value: &str,
    component: &'static str,
    input: &str,
) -> Result<u16, PortIdError> {
    value.parse().map_err(|_| PortIdError::Component {
        component,
        input: input.to_string(),
    })
}

impl FromStr for PortId {
    type Err = PortIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let (slot, rest) = input
            .split_once('/')
            .ok_or_else(|| PortIdError::Format(input.to_string()))?;
        let (port, subport) = match rest.split_once(':') {
            Some((port, subport)) => (port, Some(subport)),
            None => (rest, None),
        };
        if slot.is_empty() || port.is_empty() || subport.is_some_and(str::is_empty) {
            return Err(PortIdError::Format(input.to_string()));
        }

        Ok(Self {
            slot: parse_component(slot, "slot", input)?,
            port: parse_component(port, "port", input)?,
            subport: subport
                .map(|sub| parse_component(sub, "subport", input))
                .transpose()?,
        })
    }
}

impl TryFrom<String> for PortId {
    type Error = PortIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortId> for String {
    fn from(value: PortId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.slot, self.port)?;
        if let Some(subport) = self.subport {
            write!(f, ":{subport}")?;
        }
        Ok(())
    }
}
