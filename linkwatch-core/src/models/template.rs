//! Command templates with `{name}` placeholders.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Shell command with `{placeholder}` slots, e.g. `ethtool -S {interface}`
///
/// Unknown placeholders are left untouched so that literal braces in vendor
/// commands survive rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(String);

impl CommandTemplate {
    /// Creates a template from its source text
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Template source text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitutes every `{name}` in `vars`
    #[must_use]
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        vars.iter().fold(self.0.clone(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
    }

    /// Returns true if the template references `{name}`
    #[must_use]
    pub fn uses(&self, name: &str) -> bool {
        self.0.contains(&format!("{{{name}}}"))
    }
}

impl From<&str> for CommandTemplate {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_all_occurrences() {
        let template = CommandTemplate::new("ethtool -S {interface} | grep {interface}");
        assert_eq!(
            template.render(&[("interface", "ens1f0")]),
            "ethtool -S ens1f0 | grep ens1f0"
        );
    }

    #[test]
    fn test_unknown_placeholders_are_kept() {
        let template = CommandTemplate::new("awk '{print $2}' /proc/net/dev {port}");
        assert_eq!(
            template.render(&[("port", "1/1")]),
            "awk '{print $2}' /proc/net/dev 1/1"
        );
        assert!(template.uses("port"));
        assert!(!template.uses("interface"));
    }
}
