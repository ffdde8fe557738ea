//! Bench simulator: virtual gates on the real broker.
//!
//! Each virtual gate answers `gatecmd/<id>` with `gateack/<id>` and publishes
//! a JSON heartbeat carrying its position every heartbeat period.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use blastgate_core::config::BrokerConfig;
use blastgate_core::topic::{Topic, TopicCategory, TopicLayout};
use blastgate_core::types::{GATE_CLOSED, GateCommand};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{CommandPublisher, InboundMessage};
use crate::mqtt;

/// Positions of the simulated gates, keyed by gate id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualGates {
    layout: TopicLayout,
    positions: BTreeMap<String, String>,
}

impl VirtualGates {
    /// Every gate starts closed.
    pub fn new<I, S>(layout: TopicLayout, gate_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            layout,
            positions: gate_ids
                .into_iter()
                .map(|id| (id.into(), GATE_CLOSED.to_owned()))
                .collect(),
        }
    }

    pub fn position(&self, gate_id: &str) -> Option<&str> {
        self.positions.get(gate_id).map(String::as_str)
    }

    /// Apply one inbound message. Returns the acknowledgement to publish, or
    /// `None` if the message is not a valid command for one of our gates.
    pub fn handle_command(&mut self, msg: &InboundMessage) -> Option<(String, String)> {
        let relative = msg
            .topic
            .strip_prefix(self.layout.prefix())
            .unwrap_or(&msg.topic);
        let topic = Topic::parse(relative).ok()?;
        if topic.category != TopicCategory::GateCommand {
            return None;
        }
        let gate_id = topic.device_id?;
        let position = self.positions.get_mut(&gate_id)?;

        let Some(command) = GateCommand::parse(&msg.payload) else {
            warn!(gate = %gate_id, payload = %msg.payload, "unknown gate command");
            return None;
        };
        command.expected_status().clone_into(position);
        debug!(gate = %gate_id, %command, "virtual gate moved");
        Some((self.layout.gate_ack(&gate_id), position.clone()))
    }

    /// One heartbeat per gate, in id order.
    pub fn heartbeats(&self) -> Vec<(String, String)> {
        self.positions
            .iter()
            .map(|(id, pos)| (self.layout.heartbeat(id), json!({ "gatePos": pos }).to_string()))
            .collect()
    }
}

/// Run virtual gates until `cancel` fires.
pub async fn run_simulator(
    broker: &BrokerConfig,
    layout: TopicLayout,
    gate_ids: Vec<String>,
    heartbeat_period: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut gates = VirtualGates::new(layout.clone(), gate_ids);
    let client_id = format!("{}-sim", broker.client_id);
    let (bus, eventloop) = mqtt::connect(broker, &client_id);
    let (tx, mut rx) = mpsc::channel(64);

    let pump = tokio::spawn(mqtt::run_event_loop(
        eventloop,
        bus.clone(),
        vec![layout.gate_command_filter()],
        tx,
        cancel.child_token(),
    ));

    info!(
        gates = ?gates.positions.keys().collect::<Vec<_>>(),
        "simulating gates on {}:{}",
        broker.host,
        broker.port
    );

    let mut ticker = interval(heartbeat_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if let Some((topic, status)) = gates.handle_command(&msg) {
                    if let Err(e) = bus.publish(&topic, &status) {
                        warn!("ack not sent: {e}");
                    }
                }
            }
            _ = ticker.tick() => {
                for (topic, payload) in gates.heartbeats() {
                    if let Err(e) = bus.publish(&topic, &payload) {
                        warn!("heartbeat not sent: {e}");
                    }
                }
            }
        }
    }

    cancel.cancel();
    pump.await.context("simulator event loop panicked")?;
    info!("simulator stopped");
    Ok(())
}

/// Publish one tool-sensor reading, as the current sensor on a tool would.
pub async fn publish_tool_state(
    broker: &BrokerConfig,
    layout: &TopicLayout,
    tool_id: &str,
    state: &str,
) -> anyhow::Result<()> {
    let client_id = format!("{}-tool-{tool_id}", broker.client_id);
    let topic = layout.tool_sensor(tool_id);
    mqtt::publish_once(broker, &client_id, &topic, state, Duration::from_secs(5)).await?;
    info!(%topic, state, "tool state published");
    Ok(())
}
