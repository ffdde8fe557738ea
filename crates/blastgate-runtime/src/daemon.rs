//! Daemon wiring: builds every component from the shop config, runs them as
//! tasks under one cancellation token, and tears them down on a signal.

use std::sync::Arc;

use blastgate_core::config::ShopConfig;
use blastgate_core::registry::DeviceRegistry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusActuator, CommandPublisher, GateCommander};
use crate::coordinator::{SwitchTiming, ToolSwitchCoordinator};
use crate::dispatch::Dispatcher;
use crate::manual::ManualOverride;
use crate::mqtt;
use crate::registry::RegistryHandle;
use crate::server::{self, StatusSources};
use crate::sweeper;

/// Inbound messages buffered between the MQTT event loop and the dispatcher.
const INBOUND_CAPACITY: usize = 256;

/// Resolves on ctrl-c or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}

/// Run the daemon: bus adapter, dispatcher, sweeper and status server.
///
/// The status socket is claimed before anything touches the broker, so a
/// second daemon fails here and leaves the running one alone.
pub async fn run_daemon(config: ShopConfig, socket_path: &str) -> anyhow::Result<()> {
    let listener = server::bind(socket_path).await?;

    let root = CancellationToken::new();
    let layout = config.topic_layout();
    let registry = RegistryHandle::new(DeviceRegistry::new(config.classifier()));

    let (bus, eventloop) = mqtt::connect(&config.broker, &config.broker.client_id);
    let publisher: Arc<dyn CommandPublisher> = Arc::new(bus.clone());

    let commander = GateCommander::new(Arc::clone(&publisher), layout.clone());
    let actuator = Arc::new(BusActuator::new(
        Arc::clone(&publisher),
        layout.absolute(&config.collector_topic),
    ));
    let coordinator = Arc::new(ToolSwitchCoordinator::new(
        config.tool_gate_map(),
        registry.clone(),
        commander.clone(),
        actuator,
        SwitchTiming::from(&config.timing),
        root.child_token(),
    ));
    let manual = ManualOverride::new(
        registry.clone(),
        commander,
        config.manual_gate.clone(),
        config.override_key.clone(),
    );
    let dispatcher = Dispatcher::new(
        layout.clone(),
        registry.clone(),
        Arc::clone(&coordinator),
        manual,
    );

    tracing::info!(
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        tools = config.tools.len(),
        prefix = %layout.prefix(),
        "blastgate daemon starting"
    );

    let sources = StatusSources {
        registry: registry.clone(),
        switch: coordinator.subscribe(),
    };
    let server_handle = tokio::spawn(server::serve(listener, sources, root.child_token()));

    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
    let bus_handle = tokio::spawn(mqtt::run_event_loop(
        eventloop,
        bus,
        layout.coordinator_filters(),
        tx,
        root.child_token(),
    ));
    let dispatch_handle = tokio::spawn(dispatcher.run(rx, root.child_token()));
    let sweep_handle = tokio::spawn(sweeper::run_sweeper(
        registry,
        config.timing.keepalive(),
        config.timing.sweep_period(),
        root.child_token(),
    ));

    let outcome = tokio::select! {
        () = shutdown_signal() => Ok(()),
        _ = dispatch_handle => Err(anyhow::anyhow!("dispatcher exited unexpectedly")),
        joined = server_handle => match joined {
            Ok(Ok(())) => Err(anyhow::anyhow!("status server exited unexpectedly")),
            Ok(Err(e)) => Err(e.context("status server failed")),
            Err(e) => Err(anyhow::anyhow!("status server panicked: {e}")),
        },
    };

    root.cancel();
    let (bus_joined, sweep_joined) = tokio::join!(bus_handle, sweep_handle);
    if let Err(e) = bus_joined {
        tracing::warn!("mqtt event loop panicked: {e}");
    }
    if let Err(e) = sweep_joined {
        tracing::warn!("sweeper panicked: {e}");
    }

    // The socket is ours: bind succeeded above.
    if let Err(e) = std::fs::remove_file(socket_path) {
        tracing::debug!("socket not removed: {e}");
    }
    tracing::info!("daemon stopped");
    outcome
}
