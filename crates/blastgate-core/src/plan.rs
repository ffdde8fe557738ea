//! Tool → gate routing: which gates a tool needs, which commands reach that
//! configuration, and whether the registry shows it has been reached.
//!
//! All functions work on a registry snapshot and only ever consider alive
//! gates. Dead gates get no command and never block convergence.

use std::collections::BTreeMap;

use crate::types::{DeviceRecord, GateCommand};

// ─── Mapping ─────────────────────────────────────────────────────────

/// Static tool id → open-gate ids mapping. Every gate not listed for the
/// active tool must be closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolGateMap {
    tools: BTreeMap<String, Vec<String>>,
}

impl ToolGateMap {
    pub fn new(tools: BTreeMap<String, Vec<String>>) -> Self {
        Self { tools }
    }

    /// Gates that must be open while `tool_id` runs, or `None` for an
    /// unconfigured tool.
    pub fn gates_for(&self, tool_id: &str) -> Option<&[String]> {
        self.tools.get(tool_id).map(Vec::as_slice)
    }

    pub fn tool_ids(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn required_command(gate_id: &str, open_gates: &[String]) -> GateCommand {
    if open_gates.iter().any(|g| g == gate_id) {
        GateCommand::Open
    } else {
        GateCommand::Close
    }
}

// ─── Command planning ────────────────────────────────────────────────

/// One command per alive gate, in gate id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateCommandPlan {
    pub commands: Vec<(String, GateCommand)>,
}

impl GateCommandPlan {
    /// Commands that put every alive gate into the configuration where
    /// exactly `open_gates` are open.
    pub fn for_open_set(snapshot: &[DeviceRecord], open_gates: &[String]) -> Self {
        let commands = snapshot
            .iter()
            .filter(|r| r.is_live_gate())
            .map(|r| (r.id.clone(), required_command(&r.id, open_gates)))
            .collect();
        Self { commands }
    }

    /// Operator override: only `manual_gate_id` open.
    pub fn manual_override(snapshot: &[DeviceRecord], manual_gate_id: &str) -> Self {
        Self::for_open_set(snapshot, &[manual_gate_id.to_owned()])
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn opened(&self) -> impl Iterator<Item = &str> {
        self.commands
            .iter()
            .filter(|(_, c)| *c == GateCommand::Open)
            .map(|(id, _)| id.as_str())
    }
}

// ─── Convergence ─────────────────────────────────────────────────────

/// Result of evaluating the convergence predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceCheck {
    /// Every alive gate reports its required position.
    Converged,
    /// First alive gate (in id order) that does not match yet.
    Pending {
        gate_id: String,
        expected: GateCommand,
        actual: String,
    },
}

impl ConvergenceCheck {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Evaluate the convergence predicate for the configuration where exactly
/// `open_gates` are open.
///
/// An alive gate in the open set must report `"open"`; every other alive
/// gate must report `"close"`. `"middle"` and `"?"` never satisfy either side.
pub fn check_convergence(snapshot: &[DeviceRecord], open_gates: &[String]) -> ConvergenceCheck {
    for record in snapshot.iter().filter(|r| r.is_live_gate()) {
        let expected = required_command(&record.id, open_gates);
        if record.status != expected.expected_status() {
            return ConvergenceCheck::Pending {
                gate_id: record.id.clone(),
                expected,
                actual: record.status.clone(),
            };
        }
    }
    ConvergenceCheck::Converged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceKind;
    use chrono::{DateTime, Utc};

    fn gate(id: &str, alive: bool, status: &str) -> DeviceRecord {
        DeviceRecord {
            id: id.to_owned(),
            kind: DeviceKind::Gate,
            alive,
            last_seen: DateTime::<Utc>::from_timestamp(1_700_000_000, 0),
            status: status.to_owned(),
            ip_address: None,
        }
    }

    fn tool(id: &str, status: &str) -> DeviceRecord {
        DeviceRecord {
            kind: DeviceKind::Tool,
            ..gate(id, true, status)
        }
    }

    fn open(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| (*s).to_owned()).collect()
    }

    fn default_map() -> ToolGateMap {
        let mut tools = BTreeMap::new();
        tools.insert("tablesaw".to_owned(), open(&["6"]));
        tools.insert("jointer".to_owned(), open(&["5", "1"]));
        ToolGateMap::new(tools)
    }

    // ── Mapping ──────────────────────────────────────────────────────

    #[test]
    fn mapping_lookup() {
        let map = default_map();
        assert_eq!(map.gates_for("jointer"), Some(&open(&["5", "1"])[..]));
        assert!(map.gates_for("lathe").is_none());
        assert_eq!(map.tool_ids().collect::<Vec<_>>(), vec!["jointer", "tablesaw"]);
    }

    // ── Planning ─────────────────────────────────────────────────────

    #[test]
    fn plan_commands_every_alive_gate_once() {
        let snapshot = vec![
            gate("1", false, "close"),
            gate("5", true, "close"),
            gate("6", true, "close"),
            gate("7", true, "open"),
            tool("tablesaw", "on"),
        ];
        let plan = GateCommandPlan::for_open_set(&snapshot, &open(&["6", "1"]));
        assert_eq!(
            plan.commands,
            vec![
                ("5".to_owned(), GateCommand::Close),
                ("6".to_owned(), GateCommand::Open),
                ("7".to_owned(), GateCommand::Close),
            ]
        );
        assert_eq!(plan.opened().collect::<Vec<_>>(), vec!["6"]);
    }

    #[test]
    fn plan_with_no_alive_gates_is_empty() {
        let snapshot = vec![gate("5", false, "open"), tool("jointer", "on")];
        assert!(GateCommandPlan::for_open_set(&snapshot, &open(&["5"])).is_empty());
    }

    #[test]
    fn manual_override_opens_only_manual_gate() {
        let snapshot = vec![
            gate("10", true, "close"),
            gate("5", true, "open"),
            gate("6", true, "open"),
            gate("7", false, "open"),
        ];
        let plan = GateCommandPlan::manual_override(&snapshot, "10");
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.opened().collect::<Vec<_>>(), vec!["10"]);
        assert!(plan.commands.iter().all(|(id, _)| id != "7"));
    }

    // ── Convergence ──────────────────────────────────────────────────

    #[test]
    fn converged_when_all_alive_gates_match() {
        let snapshot = vec![
            gate("5", true, "open"),
            gate("6", true, "close"),
            tool("jointer", "on"),
        ];
        assert!(check_convergence(&snapshot, &open(&["5", "1"])).is_converged());
    }

    #[test]
    fn dead_gates_never_block() {
        let snapshot = vec![gate("1", false, "close"), gate("5", true, "open")];
        assert!(check_convergence(&snapshot, &open(&["5", "1"])).is_converged());
    }

    #[test]
    fn middle_and_unknown_fail_either_side() {
        for status in ["middle", "?", "opening"] {
            let should_open = vec![gate("5", true, status)];
            assert!(!check_convergence(&should_open, &open(&["5"])).is_converged());
            assert!(!check_convergence(&should_open, &open(&[])).is_converged());
        }
    }

    #[test]
    fn pending_reports_first_mismatch() {
        let snapshot = vec![
            gate("5", true, "open"),
            gate("6", true, "middle"),
            gate("7", true, "open"),
        ];
        assert_eq!(
            check_convergence(&snapshot, &open(&["5"])),
            ConvergenceCheck::Pending {
                gate_id: "6".to_owned(),
                expected: GateCommand::Close,
                actual: "middle".to_owned(),
            }
        );
    }

    #[test]
    fn empty_snapshot_is_converged() {
        assert!(check_convergence(&[], &open(&["6"])).is_converged());
    }
}
