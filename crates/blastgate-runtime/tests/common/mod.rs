//! Shared rig for the dispatch-level tests: default shop wiring over a
//! recording bus, with timings shrunk to milliseconds.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use blastgate_core::config::ShopConfig;
use blastgate_core::registry::DeviceRegistry;
use blastgate_runtime::bus::{
    BusActuator, BusError, CommandPublisher, GateCommander, InboundMessage,
};
use blastgate_runtime::coordinator::{SwitchReport, SwitchTiming, ToolSwitchCoordinator};
use blastgate_runtime::dispatch::{Dispatcher, Routed};
use blastgate_runtime::manual::ManualOverride;
use blastgate_runtime::registry::RegistryHandle;
use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

pub const COLLECTOR_TOPIC: &str = "coordinator/0";

#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingBus {
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    /// Gate commands only, as `(gate_id, payload)`.
    pub fn gate_commands(&self) -> Vec<(String, String)> {
        self.published()
            .into_iter()
            .filter_map(|(topic, payload)| {
                topic
                    .strip_prefix("gatecmd/")
                    .map(|id| (id.to_owned(), payload))
            })
            .collect()
    }

    pub fn collector_count(&self, payload: &str) -> usize {
        self.published()
            .iter()
            .filter(|(t, p)| t == COLLECTOR_TOPIC && p == payload)
            .count()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

impl CommandPublisher for RecordingBus {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_owned(), payload.to_owned()));
        Ok(())
    }
}

pub struct Shop {
    pub config: ShopConfig,
    pub registry: RegistryHandle,
    pub coordinator: Arc<ToolSwitchCoordinator>,
    pub dispatcher: Dispatcher,
    pub bus: Arc<RecordingBus>,
    pub shutdown: CancellationToken,
}

impl Shop {
    /// Default tool map, 10ms polls, 200ms deadline, 20ms settle.
    pub fn new() -> Self {
        let mut config = ShopConfig::default();
        config.timing.poll_interval_ms = 10;
        config.timing.poll_attempts = 20;
        config.timing.settle_delay_ms = 20;

        let layout = config.topic_layout();
        let registry = RegistryHandle::new(DeviceRegistry::new(config.classifier()));
        let bus = Arc::new(RecordingBus::default());
        let publisher: Arc<dyn CommandPublisher> = bus.clone();
        let commander = GateCommander::new(Arc::clone(&publisher), layout.clone());
        let actuator = Arc::new(BusActuator::new(
            publisher,
            layout.absolute(&config.collector_topic),
        ));
        let shutdown = CancellationToken::new();
        let coordinator = Arc::new(ToolSwitchCoordinator::new(
            config.tool_gate_map(),
            registry.clone(),
            commander.clone(),
            actuator,
            SwitchTiming::from(&config.timing),
            shutdown.clone(),
        ));
        let manual = ManualOverride::new(
            registry.clone(),
            commander,
            config.manual_gate.clone(),
            config.override_key.clone(),
        );
        let dispatcher =
            Dispatcher::new(layout, registry.clone(), Arc::clone(&coordinator), manual);

        Self {
            config,
            registry,
            coordinator,
            dispatcher,
            bus,
            shutdown,
        }
    }

    pub async fn send(&self, topic: &str, payload: &str) -> Routed {
        self.dispatcher
            .handle(InboundMessage::new(topic, payload))
            .await
    }

    /// Bring gates online with a heartbeat reporting `position`.
    pub async fn gates_online(&self, ids: &[&str], position: &str) {
        for id in ids {
            let body = format!(r#"{{"gatePos":"{position}"}}"#);
            self.send(&format!("heartbeat/{id}"), &body).await;
        }
    }

    /// Register gate `id`, then sweep as if the keepalive window had passed.
    /// Call before bringing the live gates online: the sweep hits every
    /// device seen so far.
    pub async fn gate_gone_silent(&self, id: &str) {
        self.registry.ack(id, "close").await;
        let keepalive = self.config.timing.keepalive();
        let later = Utc::now() + keepalive + TimeDelta::seconds(1);
        let dead = self.registry.sweep(later, keepalive).await;
        assert!(dead.iter().any(|d| d == id), "{id} should be swept: {dead:?}");
    }

    /// Wait until the latest run has finished.
    pub async fn finished_run(&self) -> SwitchReport {
        let mut rx = self.coordinator.subscribe();
        let report = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|r| r.run_id > 0 && r.phase.is_terminal()),
        )
        .await
        .expect("run finishes in time")
        .expect("coordinator alive");
        report.clone()
    }
}
