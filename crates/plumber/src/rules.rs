//! Compiled rule set
//!
//! Rules are compiled once from [`RuleSource`] and never change afterwards.
//! Declaration order is preserved and is the only tie-break.

use std::fmt;

use plumbconf::{ConnectRuleDef, RenameRuleDef, RuleSource};
use regex::Regex;
use thiserror::Error;

use crate::port::{PortKind, PortSnapshot};

/// Why a rule source could not be compiled. Always fatal at startup.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{rule}: missing required field `{field}`")]
    MissingField { rule: RuleLabel, field: &'static str },

    #[error("{rule}: invalid `{field}` pattern: {source}")]
    InvalidPattern {
        rule: RuleLabel,
        field: &'static str,
        source: regex::Error,
    },

    #[error("{rule}: invalid replacement: {reason}")]
    InvalidTemplate { rule: RuleLabel, reason: String },

    #[error("{rule}: unknown port_type {value:?} (expected \"audio\" or \"midi\")")]
    UnknownPortType { rule: RuleLabel, value: String },
}

/// Identifies a rule in messages: kind, 1-based position, optional name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleLabel {
    pub kind: &'static str,
    pub position: usize,
    pub name: Option<String>,
}

impl fmt::Display for RuleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} rule #{} ({})", self.kind, self.position, name),
            None => write!(f, "{} rule #{}", self.kind, self.position),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenameRule {
    pub label: RuleLabel,
    pattern: Regex,
    replacement: String,
    kind: Option<PortKind>,
    exclusive: bool,
}

impl RenameRule {
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Replacement in regex-crate syntax (`${1}`), after translation.
    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn applies_to(&self, kind: &PortKind) -> bool {
        self.kind.as_ref().map_or(true, |k| k == kind)
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    /// Substitute the first match of the pattern in `name`.
    ///
    /// `None` when the pattern does not match at all.
    pub fn apply(&self, name: &str) -> Option<String> {
        if !self.pattern.is_match(name) {
            return None;
        }
        Some(self.pattern.replace(name, self.replacement.as_str()).into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct ConnectRule {
    pub label: RuleLabel,
    source: Regex,
    destination: Regex,
    kind: Option<PortKind>,
    exclusive: bool,
}

impl ConnectRule {
    pub fn source(&self) -> &str {
        self.source.as_str()
    }

    pub fn destination(&self) -> &str {
        self.destination.as_str()
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn applies_to(&self, kind: &PortKind) -> bool {
        self.kind.as_ref().map_or(true, |k| k == kind)
    }

    /// Output port selectable as a source under `name`.
    pub fn matches_source(&self, port: &PortSnapshot, name: &str) -> bool {
        port.is_output() && self.applies_to(&port.kind) && self.source.is_match(name)
    }

    /// Input port selectable as a destination under `name`.
    pub fn matches_destination(&self, port: &PortSnapshot, name: &str) -> bool {
        port.is_input() && self.applies_to(&port.kind) && self.destination.is_match(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    renames: Vec<RenameRule>,
    connects: Vec<ConnectRule>,
}

impl RuleSet {
    pub fn compile(source: &RuleSource) -> Result<Self, CompileError> {
        let renames = source
            .rename
            .iter()
            .enumerate()
            .map(|(i, def)| compile_rename(i + 1, def))
            .collect::<Result<Vec<_>, _>>()?;
        let connects = source
            .connect
            .iter()
            .enumerate()
            .map(|(i, def)| compile_connect(i + 1, def))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { renames, connects })
    }

    pub fn rename_rules(&self) -> &[RenameRule] {
        &self.renames
    }

    pub fn connect_rules(&self) -> &[ConnectRule] {
        &self.connects
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty() && self.connects.is_empty()
    }

    /// Rename rules whose pattern matches the port's current full name.
    pub fn rename_rules_matching(&self, port: &PortSnapshot) -> Vec<&RenameRule> {
        self.renames
            .iter()
            .filter(|rule| rule.applies_to(&port.kind) && rule.is_match(&port.full_name))
            .collect()
    }

    /// Connect rules that select the port, as a source if it is an output
    /// or as a destination if it is an input.
    pub fn connect_rules_matching(&self, port: &PortSnapshot) -> Vec<&ConnectRule> {
        self.connects
            .iter()
            .filter(|rule| {
                rule.matches_source(port, &port.full_name)
                    || rule.matches_destination(port, &port.full_name)
            })
            .collect()
    }
}

fn compile_rename(position: usize, def: &RenameRuleDef) -> Result<RenameRule, CompileError> {
    let label = RuleLabel {
        kind: "rename",
        position,
        name: def.name.clone(),
    };

    let pattern = required(&label, "pattern", &def.pattern)?;
    let pattern = compile_pattern(&label, "pattern", pattern)?;
    let replacement = required(&label, "replacement", &def.replacement)?;
    let replacement = translate_template(replacement);
    check_group_refs(&label, &replacement, pattern.captures_len())?;
    let kind = port_kind(&label, &def.port_type)?;

    Ok(RenameRule {
        label,
        pattern,
        replacement,
        kind,
        exclusive: def.exclusive,
    })
}

fn compile_connect(position: usize, def: &ConnectRuleDef) -> Result<ConnectRule, CompileError> {
    let label = RuleLabel {
        kind: "connect",
        position,
        name: def.name.clone(),
    };

    let source = required(&label, "source", &def.source)?;
    let source = compile_pattern(&label, "source", source)?;
    let destination = required(&label, "destination", &def.destination)?;
    let destination = compile_pattern(&label, "destination", destination)?;
    let kind = port_kind(&label, &def.port_type)?;

    Ok(ConnectRule {
        label,
        source,
        destination,
        kind,
        exclusive: def.exclusive,
    })
}

fn required<'a>(
    label: &RuleLabel,
    field: &'static str,
    value: &'a Option<String>,
) -> Result<&'a str, CompileError> {
    value.as_deref().ok_or_else(|| CompileError::MissingField {
        rule: label.clone(),
        field,
    })
}

fn compile_pattern(label: &RuleLabel, field: &'static str, pattern: &str) -> Result<Regex, CompileError> {
    Regex::new(pattern).map_err(|source| CompileError::InvalidPattern {
        rule: label.clone(),
        field,
        source,
    })
}

fn port_kind(label: &RuleLabel, value: &Option<String>) -> Result<Option<PortKind>, CompileError> {
    match value {
        None => Ok(None),
        Some(v) => PortKind::from_rule_name(v)
            .map(Some)
            .ok_or_else(|| CompileError::UnknownPortType {
                rule: label.clone(),
                value: v.clone(),
            }),
    }
}

/// Rewrite `\1`-style back references as `${1}`; `\\` is a literal backslash.
fn translate_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len() + 4);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(d) if d.is_ascii_digit() => {
                out.push_str("${");
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    out.push(d);
                    chars.next();
                }
                out.push('}');
            }
            Some('\\') => {
                out.push('\\');
                chars.next();
            }
            _ => out.push('\\'),
        }
    }

    out
}

/// Numeric group references must exist in the pattern.
fn check_group_refs(label: &RuleLabel, template: &str, captures_len: usize) -> Result<(), CompileError> {
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        if bytes.get(i + 1) == Some(&b'$') {
            i += 2;
            continue;
        }

        let braced = bytes.get(i + 1) == Some(&b'{');
        let start = if braced { i + 2 } else { i + 1 };
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }

        // `$name` / `${name}` are left to the regex crate
        let numeric = end > start && (!braced || bytes.get(end) == Some(&b'}'));
        if numeric {
            let group: usize = template[start..end].parse().unwrap_or(usize::MAX);
            if group >= captures_len {
                return Err(CompileError::InvalidTemplate {
                    rule: label.clone(),
                    reason: format!(
                        "group {} referenced but pattern has {} group(s)",
                        group,
                        captures_len.saturating_sub(1)
                    ),
                });
            }
        }
        i = end.max(i + 1);
    }

    Ok(())
}
