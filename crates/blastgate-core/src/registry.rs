//! Device registry: liveness and last reported status per device id.
//!
//! Records are created lazily the first time a message names an unseen id
//! and are never removed; a silent device is only marked dead. Liveness is
//! set by inbound messages and cleared by [`DeviceRegistry::sweep_stale`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use crate::types::{DeviceKind, DeviceRecord, STATUS_UNKNOWN, TOOL_OFF};

/// Heartbeat JSON field carrying the gate position.
const GATE_POSITION_FIELD: &str = "gatePos";

/// Heartbeat JSON field carrying the node's IP address.
const IP_ADDRESS_FIELD: &str = "ipAddress";

// ─── Classification ──────────────────────────────────────────────────

/// Decides a device's kind from its id alone.
///
/// Precedence: coordinator id, then configured tool ids, then pure-numeric
/// ids are gates. Everything else is [`DeviceKind::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceClassifier {
    coordinator_id: String,
    tool_ids: BTreeSet<String>,
}

impl DeviceClassifier {
    pub fn new<I, S>(coordinator_id: impl Into<String>, tool_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            coordinator_id: coordinator_id.into(),
            tool_ids: tool_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn classify(&self, id: &str) -> DeviceKind {
        if id == self.coordinator_id {
            DeviceKind::Coordinator
        } else if self.tool_ids.contains(id) {
            DeviceKind::Tool
        } else if is_numeric_id(id) {
            DeviceKind::Gate
        } else {
            DeviceKind::Unknown
        }
    }

    pub fn coordinator_id(&self) -> &str {
        &self.coordinator_id
    }

    pub fn tool_ids(&self) -> impl Iterator<Item = &str> {
        self.tool_ids.iter().map(String::as_str)
    }
}

/// Gate ids are non-empty runs of ASCII digits.
pub fn is_numeric_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

// ─── Heartbeat outcome ───────────────────────────────────────────────

/// What a heartbeat changed besides liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Gate position taken from the payload.
    PositionUpdated,
    /// Payload parsed but carried no usable position for this device.
    LivenessOnly,
    /// Payload was not a JSON object; status left untouched.
    MalformedPayload,
}

// ─── Registry ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    entries: BTreeMap<String, DeviceRecord>,
    classifier: DeviceClassifier,
}

impl DeviceRegistry {
    /// Create a registry with every configured tool and the coordinator
    /// pre-registered as not yet seen. Tools start in the `"off"` state.
    pub fn new(classifier: DeviceClassifier) -> Self {
        let mut entries = BTreeMap::new();

        let coordinator_id = classifier.coordinator_id().to_owned();
        entries.insert(
            coordinator_id.clone(),
            DeviceRecord::unseen(coordinator_id, DeviceKind::Coordinator),
        );

        for tool_id in classifier.tool_ids() {
            let mut record = DeviceRecord::unseen(tool_id, DeviceKind::Tool);
            record.status = TOOL_OFF.to_owned();
            entries.insert(tool_id.to_owned(), record);
        }

        Self {
            entries,
            classifier,
        }
    }

    pub fn classifier(&self) -> &DeviceClassifier {
        &self.classifier
    }

    /// Fetch or lazily create the record for `id`, refreshing its liveness.
    fn touch(&mut self, id: &str, now: DateTime<Utc>) -> &mut DeviceRecord {
        let kind = self.classifier.classify(id);
        let record = self
            .entries
            .entry(id.to_owned())
            .or_insert_with(|| DeviceRecord::unseen(id, kind));
        record.alive = true;
        record.last_seen = Some(now);
        record
    }

    /// Record a heartbeat. Liveness is refreshed even when the payload is
    /// garbage; only gates take their status from the payload.
    pub fn upsert_heartbeat(
        &mut self,
        id: &str,
        raw_payload: &str,
        now: DateTime<Utc>,
    ) -> HeartbeatOutcome {
        let record = self.touch(id, now);

        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(raw_payload) else {
            return HeartbeatOutcome::MalformedPayload;
        };

        if let Some(ip) = fields.get(IP_ADDRESS_FIELD).and_then(Value::as_str) {
            record.ip_address = Some(ip.to_owned());
        }

        if !record.is_gate() {
            return HeartbeatOutcome::LivenessOnly;
        }

        match fields.get(GATE_POSITION_FIELD).and_then(Value::as_str) {
            Some(position) => {
                record.status = position.to_owned();
                HeartbeatOutcome::PositionUpdated
            }
            None => HeartbeatOutcome::LivenessOnly,
        }
    }

    /// Record a gate acknowledgement; the body is the new position.
    pub fn upsert_ack(&mut self, id: &str, payload: &str, now: DateTime<Utc>) -> DeviceKind {
        self.set_raw_status(id, payload, now)
    }

    /// Record a tool sensor transition; the body is `"on"` or `"off"`.
    pub fn upsert_tool_sensor(
        &mut self,
        id: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> DeviceKind {
        self.set_raw_status(id, payload, now)
    }

    fn set_raw_status(&mut self, id: &str, payload: &str, now: DateTime<Utc>) -> DeviceKind {
        let record = self.touch(id, now);
        let status = payload.trim();
        record.status = if status.is_empty() {
            STATUS_UNKNOWN.to_owned()
        } else {
            status.to_owned()
        };
        record.kind
    }

    /// Mark every device silent for longer than `keepalive` as dead.
    ///
    /// Never revives a device. Returns the ids newly marked dead, in id order.
    pub fn sweep_stale(&mut self, now: DateTime<Utc>, keepalive: TimeDelta) -> Vec<String> {
        let mut newly_dead = Vec::new();

        for record in self.entries.values_mut() {
            let Some(last_seen) = record.last_seen else {
                continue;
            };
            if record.alive && now.signed_duration_since(last_seen) > keepalive {
                record.alive = false;
                newly_dead.push(record.id.clone());
            }
        }

        newly_dead
    }

    /// Point-in-time copy of every record, sorted by id.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.entries.values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&DeviceRecord> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
