//! Operator override from the coordinator keypad: one gate open, every
//! other alive gate closed. Fire-and-forget; the collector is not touched.

use blastgate_core::plan::GateCommandPlan;
use tracing::{debug, info};

use crate::bus::GateCommander;
use crate::registry::RegistryHandle;

pub struct ManualOverride {
    registry: RegistryHandle,
    commander: GateCommander,
    manual_gate: String,
    override_key: String,
}

impl ManualOverride {
    pub fn new(
        registry: RegistryHandle,
        commander: GateCommander,
        manual_gate: impl Into<String>,
        override_key: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            commander,
            manual_gate: manual_gate.into(),
            override_key: override_key.into(),
        }
    }

    pub fn is_override_key(&self, key: &str) -> bool {
        key.trim() == self.override_key
    }

    /// Handle a keypress. Returns the plan that was published, or `None`
    /// when the key is not the override key.
    pub async fn handle_keypress(&self, key: &str) -> Option<GateCommandPlan> {
        if !self.is_override_key(key) {
            debug!(key, "ignoring coordinator keypress");
            return None;
        }

        let snapshot = self.registry.snapshot().await;
        let plan = GateCommandPlan::manual_override(&snapshot, &self.manual_gate);
        let sent = self.commander.publish_plan(&plan);
        info!(gate = %self.manual_gate, commands = sent, "manual override applied");
        Some(plan)
    }
}
