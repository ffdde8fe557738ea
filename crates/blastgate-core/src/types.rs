//! Device model shared by the registry, planner and status surfaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Status vocabulary ───────────────────────────────────────────────

/// Status of a device that has not reported anything yet.
pub const STATUS_UNKNOWN: &str = "?";

/// Gate positions as reported by heartbeats and acknowledgements.
pub const GATE_OPEN: &str = "open";
pub const GATE_CLOSED: &str = "close";
pub const GATE_MIDDLE: &str = "middle";

/// Tool sensor states.
pub const TOOL_ON: &str = "on";
pub const TOOL_OFF: &str = "off";

// ─── Device kind ─────────────────────────────────────────────────────

/// What a device id denotes. Decided purely from the id, see
/// [`DeviceClassifier`](crate::registry::DeviceClassifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Gate,
    Tool,
    Coordinator,
    Unknown,
}

// ─── Device record ───────────────────────────────────────────────────

/// One entry of the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub kind: DeviceKind,
    pub alive: bool,
    /// `None` for records pre-registered at startup that never reported.
    pub last_seen: Option<DateTime<Utc>>,
    pub status: String,
    pub ip_address: Option<String>,
}

impl DeviceRecord {
    /// A record that has never been heard from.
    pub fn unseen(id: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            alive: false,
            last_seen: None,
            status: STATUS_UNKNOWN.to_owned(),
            ip_address: None,
        }
    }

    pub fn is_gate(&self) -> bool {
        self.kind == DeviceKind::Gate
    }

    /// Alive gates are the only devices commands are ever sent to.
    pub fn is_live_gate(&self) -> bool {
        self.alive && self.is_gate()
    }
}

// ─── Gate command ────────────────────────────────────────────────────

/// Payload of a `gatecmd/<id>` publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateCommand {
    Open,
    Close,
    Middle,
}

impl GateCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => GATE_OPEN,
            Self::Close => GATE_CLOSED,
            Self::Middle => GATE_MIDDLE,
        }
    }

    /// Parse a raw command payload. Only the three wire words are accepted.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            GATE_OPEN => Some(Self::Open),
            GATE_CLOSED => Some(Self::Close),
            GATE_MIDDLE => Some(Self::Middle),
            _ => None,
        }
    }

    /// The position a gate reports once this command has been carried out.
    pub fn expected_status(self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for GateCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
