//! Shop configuration schema (TOML).
//!
//! Every field has a default matching the reference shop layout, so an empty
//! file (or no file at all) yields a working configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::plan::ToolGateMap;
use crate::registry::{DeviceClassifier, is_numeric_id};
use crate::topic::TopicLayout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShopConfig {
    /// Reserved id of the coordinator panel itself.
    pub coordinator_id: String,
    /// Gate opened by the manual override keypress.
    pub manual_gate: String,
    /// Keypress payload that triggers the manual override.
    pub override_key: String,
    /// Prepended to every outbound topic and subscription filter.
    pub topic_prefix: String,
    /// Topic (relative to the prefix) receiving `dc_on` / `dc_off`.
    pub collector_topic: String,
    pub broker: BrokerConfig,
    pub timing: TimingConfig,
    /// Tool id → gate ids that must be open while it runs.
    pub tools: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Silence after which a device is presumed dead.
    pub keepalive_secs: u64,
    /// Period of the liveness sweep.
    pub sweep_period_secs: u64,
    /// Re-check interval while waiting for gates.
    pub poll_interval_ms: u64,
    /// Poll budget; the switch deadline is `poll_interval_ms * poll_attempts`.
    pub poll_attempts: u32,
    /// Pause after convergence before the collector is switched on.
    pub settle_delay_ms: u64,
}

impl Default for ShopConfig {
    fn default() -> Self {
        let tools = [
            ("tablesaw", &["6"][..]),
            ("jointer", &["5", "1"][..]),
            ("bandsaw", &["5", "4"][..]),
            ("sander", &["5", "7"][..]),
        ]
        .into_iter()
        .map(|(tool, gates)| {
            (
                tool.to_owned(),
                gates.iter().map(|g| (*g).to_owned()).collect(),
            )
        })
        .collect();

        Self {
            coordinator_id: "0".to_owned(),
            manual_gate: "10".to_owned(),
            override_key: "E".to_owned(),
            topic_prefix: String::new(),
            collector_topic: "coordinator/0".to_owned(),
            broker: BrokerConfig::default(),
            timing: TimingConfig::default(),
            tools,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 1883,
            client_id: "blastgate".to_owned(),
            keep_alive_secs: 60,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: 60,
            sweep_period_secs: 10,
            poll_interval_ms: 100,
            poll_attempts: 20,
            settle_delay_ms: 200,
        }
    }
}

impl ShopConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };

        if self.override_key.is_empty() {
            return invalid("override_key must not be empty".to_owned());
        }
        if !is_numeric_id(&self.manual_gate) {
            return invalid(format!("manual_gate {:?} is not a gate id", self.manual_gate));
        }
        if self.timing.poll_attempts == 0 {
            return invalid("timing.poll_attempts must be at least 1".to_owned());
        }
        if self.timing.poll_interval_ms == 0 {
            return invalid("timing.poll_interval_ms must be positive".to_owned());
        }
        if self.timing.sweep_period_secs == 0 {
            return invalid("timing.sweep_period_secs must be positive".to_owned());
        }
        if self.timing.keepalive_secs == 0 {
            return invalid("timing.keepalive_secs must be positive".to_owned());
        }
        for (tool, gates) in &self.tools {
            if tool == &self.coordinator_id {
                return invalid(format!("tool {tool:?} collides with the coordinator id"));
            }
            if let Some(bad) = gates.iter().find(|g| !is_numeric_id(g)) {
                return invalid(format!("tool {tool:?} maps to non-numeric gate {bad:?}"));
            }
        }
        Ok(())
    }

    pub fn tool_gate_map(&self) -> ToolGateMap {
        ToolGateMap::new(self.tools.clone())
    }

    pub fn classifier(&self) -> DeviceClassifier {
        DeviceClassifier::new(self.coordinator_id.clone(), self.tools.keys().cloned())
    }

    pub fn topic_layout(&self) -> TopicLayout {
        TopicLayout::new(self.topic_prefix.clone())
    }
}

impl TimingConfig {
    pub fn keepalive(&self) -> TimeDelta {
        TimeDelta::seconds(i64::try_from(self.keepalive_secs).unwrap_or(i64::MAX))
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Hard deadline of one tool switch.
    pub fn switch_deadline(&self) -> Duration {
        self.poll_interval() * self.poll_attempts
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
