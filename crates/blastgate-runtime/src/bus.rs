//! Bus-facing collaborator seams: command publishing, the collector
//! actuator, and the inbound message envelope.
//!
//! The MQTT adapter in [`crate::mqtt`] implements [`CommandPublisher`];
//! tests substitute recording doubles.

use std::sync::Arc;

use blastgate_core::plan::GateCommandPlan;
use blastgate_core::topic::TopicLayout;
use blastgate_core::types::GateCommand;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Collector payloads understood by the coordinator panel.
pub const COLLECTOR_ON: &str = "dc_on";
pub const COLLECTOR_OFF: &str = "dc_off";

#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

// ─── Inbound ─────────────────────────────────────────────────────────

/// One message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Decode a raw payload; invalid UTF-8 is replaced, never rejected.
    pub fn from_bytes(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self::new(topic, String::from_utf8_lossy(payload).into_owned())
    }
}

// ─── Outbound ────────────────────────────────────────────────────────

/// At-most-once publish. Must not block: it is called from the dispatch
/// task.
pub trait CommandPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError>;
}

impl<T: CommandPublisher + ?Sized> CommandPublisher for Arc<T> {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        (**self).publish(topic, payload)
    }
}

/// Dust collector switch. Fire-and-forget: failures are the actuator's
/// concern and are only logged.
pub trait Actuator: Send + Sync {
    fn turn_on(&self);
    fn turn_off(&self);
}

/// Actuator that forwards `dc_on` / `dc_off` to the coordinator panel over
/// the bus.
pub struct BusActuator {
    publisher: Arc<dyn CommandPublisher>,
    topic: String,
}

impl BusActuator {
    pub fn new(publisher: Arc<dyn CommandPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    fn send(&self, payload: &str) {
        match self.publisher.publish(&self.topic, payload) {
            Ok(()) => info!(topic = %self.topic, payload, "collector command sent"),
            Err(e) => warn!("collector command {payload} failed: {e}"),
        }
    }
}

impl Actuator for BusActuator {
    fn turn_on(&self) {
        self.send(COLLECTOR_ON);
    }

    fn turn_off(&self) {
        self.send(COLLECTOR_OFF);
    }
}

/// Publishes gate commands, one topic per gate.
#[derive(Clone)]
pub struct GateCommander {
    publisher: Arc<dyn CommandPublisher>,
    layout: TopicLayout,
}

impl GateCommander {
    pub fn new(publisher: Arc<dyn CommandPublisher>, layout: TopicLayout) -> Self {
        Self { publisher, layout }
    }

    pub fn send(&self, gate_id: &str, command: GateCommand) -> Result<(), BusError> {
        let topic = self.layout.gate_command(gate_id);
        debug!(%topic, %command, "publishing gate command");
        self.publisher.publish(&topic, command.as_str())
    }

    /// Publish every command of `plan` in order. A failed publish is logged
    /// and skipped. Returns the number of commands handed to the bus.
    pub fn publish_plan(&self, plan: &GateCommandPlan) -> usize {
        let mut sent = 0;
        for (gate_id, command) in &plan.commands {
            match self.send(gate_id, *command) {
                Ok(()) => sent += 1,
                Err(e) => warn!(gate = %gate_id, %command, "gate command not sent: {e}"),
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<(String, String)>>,
        fail_topic: Option<String>,
    }

    impl CommandPublisher for Recorder {
        fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
            if self.fail_topic.as_deref() == Some(topic) {
                return Err(BusError::Publish {
                    topic: topic.to_owned(),
                    reason: "broker unreachable".to_owned(),
                });
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_owned(), payload.to_owned()));
            Ok(())
        }
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(t, p)| ((*t).to_owned(), (*p).to_owned()))
            .collect()
    }

    #[test]
    fn inbound_payload_is_decoded_lossily() {
        let msg = InboundMessage::from_bytes("gateack/5", b"open\xff");
        assert_eq!(msg.topic, "gateack/5");
        assert!(msg.payload.starts_with("open"));
    }

    #[test]
    fn actuator_publishes_collector_words() {
        let recorder = Arc::new(Recorder::default());
        let actuator = BusActuator::new(recorder.clone(), "/coordinator/0");
        actuator.turn_on();
        actuator.turn_off();
        assert_eq!(
            *recorder.published.lock().unwrap(),
            pairs(&[("/coordinator/0", "dc_on"), ("/coordinator/0", "dc_off")])
        );
    }

    #[test]
    fn commander_publishes_plan_in_order_and_skips_failures() {
        let recorder = Arc::new(Recorder {
            fail_topic: Some("gatecmd/6".to_owned()),
            ..Recorder::default()
        });
        let commander = GateCommander::new(recorder.clone(), TopicLayout::default());
        let plan = GateCommandPlan {
            commands: vec![
                ("5".to_owned(), GateCommand::Close),
                ("6".to_owned(), GateCommand::Open),
                ("7".to_owned(), GateCommand::Close),
            ],
        };

        assert_eq!(commander.publish_plan(&plan), 2);
        assert_eq!(
            *recorder.published.lock().unwrap(),
            pairs(&[("gatecmd/5", "close"), ("gatecmd/7", "close")])
        );
    }
}
