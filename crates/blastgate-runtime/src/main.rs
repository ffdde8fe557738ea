//! blastgate: blast gate coordinator binary.

use std::collections::BTreeSet;
use std::time::Duration;

use blastgate_core::config::ShopConfig;
use blastgate_runtime::{client, config, daemon, simulator};
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod cli;

fn init_tracing() {
    let filter = std::env::var("BLASTGATE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

/// Gates to simulate when none are given: every mapped gate plus the manual gate.
fn default_sim_gates(config: &ShopConfig) -> Vec<String> {
    config
        .tools
        .values()
        .flatten()
        .chain(std::iter::once(&config.manual_gate))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon => {
            init_tracing();
            let mut config = config::load_config(args.config.as_deref())?;
            config::apply_broker_overrides(&mut config, args.broker_host, args.broker_port);
            daemon::run_daemon(config, &socket_path).await?;
        }
        cli::Command::Status(opts) => {
            client::cmd_status(&socket_path, opts.json).await?;
        }
        cli::Command::Simulate(opts) => {
            init_tracing();
            let mut config = config::load_config(args.config.as_deref())?;
            config::apply_broker_overrides(&mut config, args.broker_host, args.broker_port);
            let gates = if opts.gates.is_empty() {
                default_sim_gates(&config)
            } else {
                opts.gates
            };

            let cancel = CancellationToken::new();
            let sim = simulator::run_simulator(
                &config.broker,
                config.topic_layout(),
                gates,
                Duration::from_secs(opts.heartbeat_secs.max(1)),
                cancel.clone(),
            );
            tokio::pin!(sim);
            tokio::select! {
                res = &mut sim => res?,
                () = daemon::shutdown_signal() => {
                    cancel.cancel();
                    sim.await?;
                }
            }
        }
        cli::Command::Tool(opts) => {
            let mut config = config::load_config(args.config.as_deref())?;
            config::apply_broker_overrides(&mut config, args.broker_host, args.broker_port);
            simulator::publish_tool_state(
                &config.broker,
                &config.topic_layout(),
                &opts.tool,
                opts.state.as_str(),
            )
            .await?;
        }
    }

    Ok(())
}
