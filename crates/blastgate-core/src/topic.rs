//! Bus topic grammar.
//!
//! ```text
//! topic    := ["/"] category ["/" segment]*
//! category := "heartbeat" | "tool_sensor" | "gateack" | "gatecmd"
//!           | "coordinator_keypress" | "coordinator"
//! ```
//!
//! The device id is the final `/`-delimited segment. `coordinator_keypress`
//! carries no id. Firmware in the field publishes with a leading `/`, newer
//! nodes without; both parse to the same [`Topic`].

use crate::error::TopicParseError;

const HEARTBEAT: &str = "heartbeat";
const TOOL_SENSOR: &str = "tool_sensor";
const GATE_ACK: &str = "gateack";
const GATE_COMMAND: &str = "gatecmd";
const KEYPRESS: &str = "coordinator_keypress";
const COLLECTOR: &str = "coordinator";

/// Category of an inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicCategory {
    /// Periodic liveness + state broadcast from any device.
    Heartbeat,
    /// Tool current sensor switching on/off.
    ToolSensor,
    /// Gate confirming a commanded position.
    GateAck,
    /// Our own gate commands echoed back by the broker.
    GateCommand,
    /// Operator keypress on the coordinator panel.
    CoordinatorKeypress,
    /// Our own collector commands echoed back by the broker.
    CollectorCommand,
}

impl TopicCategory {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            HEARTBEAT => Some(Self::Heartbeat),
            TOOL_SENSOR => Some(Self::ToolSensor),
            GATE_ACK => Some(Self::GateAck),
            GATE_COMMAND => Some(Self::GateCommand),
            KEYPRESS => Some(Self::CoordinatorKeypress),
            COLLECTOR => Some(Self::CollectorCommand),
            _ => None,
        }
    }

    fn requires_id(self) -> bool {
        self != Self::CoordinatorKeypress
    }
}

/// A parsed inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub category: TopicCategory,
    /// Present for every category except [`TopicCategory::CoordinatorKeypress`].
    pub device_id: Option<String>,
}

impl Topic {
    pub fn parse(raw: &str) -> Result<Self, TopicParseError> {
        let trimmed = raw.strip_prefix('/').unwrap_or(raw);
        if trimmed.is_empty() {
            return Err(TopicParseError::Empty);
        }

        let (head, rest) = match trimmed.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (trimmed, None),
        };

        let category = TopicCategory::from_segment(head)
            .ok_or_else(|| TopicParseError::UnknownCategory(head.to_owned()))?;

        if !category.requires_id() {
            return Ok(Self {
                category,
                device_id: None,
            });
        }

        let id = rest
            .and_then(|r| r.rsplit('/').next())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TopicParseError::MissingId(raw.to_owned()))?;

        Ok(Self {
            category,
            device_id: Some(id.to_owned()),
        })
    }
}

// ─── Outbound layout ─────────────────────────────────────────────────

/// Builds outbound topics and subscription filters under a common prefix.
///
/// The prefix is prepended verbatim, so legacy firmware that expects
/// `/gatecmd/5` is served by a prefix of `"/"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicLayout {
    prefix: String,
}

impl TopicLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn gate_command(&self, gate_id: &str) -> String {
        format!("{}{GATE_COMMAND}/{gate_id}", self.prefix)
    }

    pub fn gate_ack(&self, gate_id: &str) -> String {
        format!("{}{GATE_ACK}/{gate_id}", self.prefix)
    }

    pub fn heartbeat(&self, device_id: &str) -> String {
        format!("{}{HEARTBEAT}/{device_id}", self.prefix)
    }

    pub fn tool_sensor(&self, tool_id: &str) -> String {
        format!("{}{TOOL_SENSOR}/{tool_id}", self.prefix)
    }

    /// Prefix an arbitrary relative topic (e.g. the configured collector topic).
    pub fn absolute(&self, relative: &str) -> String {
        format!("{}{relative}", self.prefix)
    }

    /// Filters the coordinator subscribes to. `#` also matches the parent
    /// level, so a bare `coordinator_keypress` is covered too.
    pub fn coordinator_filters(&self) -> Vec<String> {
        [HEARTBEAT, TOOL_SENSOR, GATE_ACK, GATE_COMMAND, KEYPRESS]
            .iter()
            .map(|c| format!("{}{c}/#", self.prefix))
            .collect()
    }

    /// Filter a simulated gate listens on.
    pub fn gate_command_filter(&self) -> String {
        format!("{}{GATE_COMMAND}/#", self.prefix)
    }
}
