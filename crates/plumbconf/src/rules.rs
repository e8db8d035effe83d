//! Raw rule definitions as written in config and rule files.
//!
//! Nothing here is validated. Required fields are `Option`s so the core's
//! rule compiler can report exactly which one is missing.

use serde::{Deserialize, Serialize};

/// A `[[rename]]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRuleDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Regex over the port's full name (`client:port`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Replacement template; `\1` and `${1}` both refer to capture groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// Restrict to `audio` or `midi` ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_type: Option<String>,
    #[serde(default)]
    pub exclusive: bool,
}

/// A `[[connect]]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRuleDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Regex over output port full names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Regex over input port full names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_type: Option<String>,
    #[serde(default)]
    pub exclusive: bool,
}

/// Ordered rule definitions, in declaration order across all loaded files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSource {
    #[serde(default)]
    pub rename: Vec<RenameRuleDef>,
    #[serde(default)]
    pub connect: Vec<ConnectRuleDef>,
}

impl RuleSource {
    pub fn is_empty(&self) -> bool {
        self.rename.is_empty() && self.connect.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rename.len() + self.connect.len()
    }

    /// Append `other`'s rules after ours, keeping declaration order.
    pub fn extend(&mut self, other: RuleSource) {
        self.rename.extend(other.rename);
        self.connect.extend(other.connect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_keeps_order() {
        let mut first = RuleSource {
            rename: vec![RenameRuleDef {
                name: Some("a".into()),
                ..Default::default()
            }],
            connect: vec![],
        };
        let second = RuleSource {
            rename: vec![RenameRuleDef {
                name: Some("b".into()),
                ..Default::default()
            }],
            connect: vec![ConnectRuleDef::default()],
        };

        first.extend(second);
        assert_eq!(first.len(), 3);
        assert_eq!(first.rename[0].name.as_deref(), Some("a"));
        assert_eq!(first.rename[1].name.as_deref(), Some("b"));
    }

    #[test]
    fn test_missing_fields_deserialize_as_none() {
        let def: ConnectRuleDef = toml::from_str(r#"source = "^a:""#).unwrap();
        assert_eq!(def.source.as_deref(), Some("^a:"));
        assert!(def.destination.is_none());
        assert!(!def.exclusive);
    }
}
