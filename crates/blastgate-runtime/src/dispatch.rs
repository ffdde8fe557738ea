//! Inbound message dispatch.
//!
//! One task drains the bus channel in arrival order and routes each message
//! by topic. Nothing here may block for long: tool switches run on their own
//! spawned tasks.

use std::sync::Arc;

use blastgate_core::error::TopicParseError;
use blastgate_core::registry::HeartbeatOutcome;
use blastgate_core::topic::{Topic, TopicCategory, TopicLayout};
use blastgate_core::types::{TOOL_OFF, TOOL_ON};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::InboundMessage;
use crate::coordinator::ToolSwitchCoordinator;
use crate::manual::ManualOverride;
use crate::registry::RegistryHandle;

/// What the dispatcher did with one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Heartbeat(HeartbeatOutcome),
    GateAck,
    ToolOn { switch_started: bool },
    ToolOff,
    /// Tool sensor reported something other than on/off.
    ToolStatus,
    ManualOverride,
    KeyIgnored,
    /// Our own command echoes; observed only.
    Echo,
    Dropped(TopicParseError),
}

pub struct Dispatcher {
    layout: TopicLayout,
    registry: RegistryHandle,
    coordinator: Arc<ToolSwitchCoordinator>,
    manual: ManualOverride,
}

impl Dispatcher {
    pub fn new(
        layout: TopicLayout,
        registry: RegistryHandle,
        coordinator: Arc<ToolSwitchCoordinator>,
        manual: ManualOverride,
    ) -> Self {
        Self {
            layout,
            registry,
            coordinator,
            manual,
        }
    }

    /// Drain `rx` until it closes or `cancel` fires.
    pub async fn run(self, mut rx: mpsc::Receiver<InboundMessage>, cancel: CancellationToken) {
        info!("dispatcher started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("dispatcher: cancellation requested, shutting down");
                    break;
                }
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        self.handle(msg).await;
                    }
                    None => {
                        info!("dispatcher: bus channel closed, shutting down");
                        break;
                    }
                },
            }
        }
    }

    pub async fn handle(&self, msg: InboundMessage) -> Routed {
        let relative = msg
            .topic
            .strip_prefix(self.layout.prefix())
            .unwrap_or(&msg.topic);
        let topic = match Topic::parse(relative) {
            Ok(topic) => topic,
            Err(e) => {
                warn!(topic = %msg.topic, "dropping message: {e}");
                return Routed::Dropped(e);
            }
        };
        let id = topic.device_id.as_deref().unwrap_or_default();
        let payload = msg.payload.as_str();

        match topic.category {
            TopicCategory::Heartbeat => {
                let outcome = self.registry.heartbeat(id, payload).await;
                if outcome == HeartbeatOutcome::MalformedPayload {
                    debug!(device = %id, "heartbeat payload is not a JSON object; status kept");
                }
                Routed::Heartbeat(outcome)
            }
            TopicCategory::GateAck => {
                self.registry.ack(id, payload).await;
                info!(gate = %id, status = %payload.trim(), "gate acknowledged");
                Routed::GateAck
            }
            TopicCategory::ToolSensor => self.on_tool_sensor(id, payload).await,
            TopicCategory::CoordinatorKeypress => {
                if !self.manual.is_override_key(payload) {
                    self.manual.handle_keypress(payload).await;
                    return Routed::KeyIgnored;
                }
                if self.coordinator.cancel_in_flight() {
                    info!("manual override preempts running tool switch");
                }
                self.manual.handle_keypress(payload).await;
                Routed::ManualOverride
            }
            TopicCategory::GateCommand | TopicCategory::CollectorCommand => {
                debug!(topic = %msg.topic, payload, "observed command echo");
                Routed::Echo
            }
        }
    }

    async fn on_tool_sensor(&self, id: &str, payload: &str) -> Routed {
        self.registry.tool_sensor(id, payload).await;
        match payload.trim() {
            TOOL_ON => {
                info!(tool = %id, "tool switched on");
                let started = self.coordinator.activate(id).is_some();
                Routed::ToolOn {
                    switch_started: started,
                }
            }
            TOOL_OFF => {
                self.coordinator.deactivate(id);
                Routed::ToolOff
            }
            other => {
                warn!(tool = %id, status = other, "unrecognised tool sensor state");
                Routed::ToolStatus
            }
        }
    }
}
