//! MQTT bus adapter built on `rumqttc`.
//!
//! [`MqttBus`] is the outbound half (a [`CommandPublisher`]); the event loop
//! is the inbound half and forwards every publish into an `mpsc` channel.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use blastgate_core::config::BrokerConfig;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusError, CommandPublisher, InboundMessage};

/// Request queue depth between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 64;
/// Pause before the event loop retries a failed connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

impl CommandPublisher for MqttBus {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| BusError::Publish {
                topic: topic.to_owned(),
                reason: e.to_string(),
            })
    }
}

/// Create the client and its (not yet polled) event loop. Nothing touches
/// the network until the event loop is driven.
pub fn connect(broker: &BrokerConfig, client_id: &str) -> (MqttBus, EventLoop) {
    let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
    options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs.max(5)));
    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    (MqttBus { client }, eventloop)
}

/// Drive the event loop until `cancel` fires or `tx` closes.
///
/// `filters` are (re)subscribed on every ConnAck, so a broker restart does
/// not silently drop the subscriptions.
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    bus: MqttBus,
    filters: Vec<String>,
    tx: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(filters = filters.len(), "connected to broker");
                for filter in &filters {
                    if let Err(e) = bus.client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                        warn!(%filter, "subscribe failed: {e}");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let msg = InboundMessage::from_bytes(publish.topic, &publish.payload);
                tokio::select! {
                    () = cancel.cancelled() => break,
                    sent = tx.send(msg) => {
                        if sent.is_err() {
                            debug!("inbound channel closed; stopping event loop");
                            break;
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("broker connection error: {e}; retrying in {RECONNECT_DELAY:?}");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    if let Err(e) = bus.client.try_disconnect() {
        debug!("disconnect request not queued: {e}");
    }
    info!("mqtt event loop stopped");
}

/// Connect, publish a single message and return once it has been written to
/// the socket.
pub async fn publish_once(
    broker: &BrokerConfig,
    client_id: &str,
    topic: &str,
    payload: &str,
    timeout: Duration,
) -> Result<()> {
    let (bus, mut eventloop) = connect(broker, client_id);
    bus.publish(topic, payload)
        .with_context(|| format!("failed to queue publish to {topic}"))?;

    let flushed = tokio::time::timeout(timeout, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match flushed {
        Ok(Ok(())) => {
            debug!(%topic, payload, "published");
            if let Err(e) = bus.client.try_disconnect() {
                debug!("disconnect request not queued: {e}");
            }
            // Let the disconnect packet go out.
            match tokio::time::timeout(Duration::from_millis(200), eventloop.poll()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!("connection closed while disconnecting: {e}"),
                Err(_) => debug!("disconnect not flushed in time"),
            }
            Ok(())
        }
        Ok(Err(e)) => Err(e).with_context(|| {
            format!("cannot reach broker at {}:{}", broker.host, broker.port)
        }),
        Err(_) => bail!(
            "timed out publishing to {topic} via {}:{}",
            broker.host,
            broker.port
        ),
    }
}
