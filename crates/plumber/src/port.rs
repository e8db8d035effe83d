//! Port snapshots
//!
//! Read-only, point-in-time descriptions of server ports. The server owns
//! the ports; we only ever hold names and re-look them up before acting.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Type string the server reports for audio ports.
pub const AUDIO_TYPE: &str = "32 bit float mono audio";

/// Type string the server reports for MIDI ports.
pub const MIDI_TYPE: &str = "8 bit raw midi";

/// Port identity: owning client plus short name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId {
    pub client: String,
    pub port: String,
}

impl PortId {
    pub fn new(client: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            port: port.into(),
        }
    }

    /// Split a `client:port` full name at the first colon.
    ///
    /// Client names cannot contain `:`, port short names can.
    pub fn parse(full_name: &str) -> Option<Self> {
        let (client, port) = full_name.split_once(':')?;
        if client.is_empty() || port.is_empty() {
            return None;
        }
        Some(Self::new(client, port))
    }

    pub fn full_name(&self) -> String {
        format!("{}:{}", self.client, self.port)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Data type carried by a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Audio,
    Midi,
    /// Any other server type string, kept verbatim.
    Other(String),
}

impl PortKind {
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            AUDIO_TYPE => Self::Audio,
            MIDI_TYPE => Self::Midi,
            other => Self::Other(other.to_string()),
        }
    }

    /// Rule-file spelling (`audio`, `midi`).
    pub fn from_rule_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "audio" => Some(Self::Audio),
            "midi" => Some(Self::Midi),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Audio => AUDIO_TYPE,
            Self::Midi => MIDI_TYPE,
            Self::Other(name) => name,
        }
    }

    /// Signals only flow between ports of the same type.
    pub fn is_compatible(&self, other: &PortKind) -> bool {
        self == other
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Midi => f.write_str("midi"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// One port as the session reported it at some instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub id: PortId,
    pub full_name: String,
    pub direction: Direction,
    pub kind: PortKind,
}

impl PortSnapshot {
    /// Returns `None` when `full_name` is not of the form `client:port`.
    pub fn new(full_name: &str, direction: Direction, kind: PortKind) -> Option<Self> {
        let id = PortId::parse(full_name)?;
        Some(Self {
            id,
            full_name: full_name.to_string(),
            direction,
            kind,
        })
    }

    pub fn audio_out(full_name: &str) -> Option<Self> {
        Self::new(full_name, Direction::Output, PortKind::Audio)
    }

    pub fn audio_in(full_name: &str) -> Option<Self> {
        Self::new(full_name, Direction::Input, PortKind::Audio)
    }

    pub fn midi_out(full_name: &str) -> Option<Self> {
        Self::new(full_name, Direction::Output, PortKind::Midi)
    }

    pub fn midi_in(full_name: &str) -> Option<Self> {
        Self::new(full_name, Direction::Input, PortKind::Midi)
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }

    /// Same port under another name.
    pub fn renamed(&self, full_name: &str) -> Option<Self> {
        Self::new(full_name, self.direction, self.kind.clone())
    }
}

impl fmt::Display for PortSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.full_name, self.kind, self.direction)
    }
}
