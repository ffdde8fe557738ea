//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "blastgate", about = "Blast gate coordinator for shop dust collection")]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/blastgate/blastgated.sock)
    #[arg(long, short = 's', global = true, visible_alias = "socket")]
    pub socket_path: Option<String>,

    /// Shop config file (TOML)
    #[arg(long, short = 'c', global = true, env = "BLASTGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the broker host from the config file
    #[arg(long, global = true)]
    pub broker_host: Option<String>,

    /// Override the broker port from the config file
    #[arg(long, global = true)]
    pub broker_port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the coordinator (MQTT dispatcher + UDS status server)
    Daemon,
    /// Show devices and the latest tool switch
    Status(StatusOpts),
    /// Run virtual gates against the broker
    Simulate(SimulateOpts),
    /// Publish a single tool sensor reading
    Tool(ToolOpts),
}

#[derive(clap::Args, Default)]
pub struct StatusOpts {
    /// Print raw JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct SimulateOpts {
    /// Gate ids to simulate (default: every gate named in the tool map plus the manual gate)
    #[arg(long, value_delimiter = ',')]
    pub gates: Vec<String>,

    /// Heartbeat period in seconds
    #[arg(long, default_value = "5")]
    pub heartbeat_secs: u64,
}

#[derive(clap::Args)]
pub struct ToolOpts {
    /// Tool id, e.g. `tablesaw`
    pub tool: String,

    /// Sensor reading to publish
    #[arg(value_enum)]
    pub state: ToolState,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ToolState {
    On,
    Off,
}

impl ToolState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/blastgate/blastgated.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/blastgate-{user}/blastgated.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_command() {
        let cli = Cli::try_parse_from(["blastgate", "tool", "jointer", "on"]).expect("parses");
        match cli.command {
            Command::Tool(opts) => {
                assert_eq!(opts.tool, "jointer");
                assert_eq!(opts.state.as_str(), "on");
            }
            _ => panic!("expected tool subcommand"),
        }
    }

    #[test]
    fn global_overrides_after_subcommand() {
        let cli = Cli::try_parse_from([
            "blastgate",
            "daemon",
            "--broker-host",
            "shop-pi",
            "--broker-port",
            "1884",
            "-s",
            "/tmp/x.sock",
        ])
        .expect("parses");
        assert!(matches!(cli.command, Command::Daemon));
        assert_eq!(cli.broker_host.as_deref(), Some("shop-pi"));
        assert_eq!(cli.broker_port, Some(1884));
        assert_eq!(cli.socket_path.as_deref(), Some("/tmp/x.sock"));
    }

    #[test]
    fn simulate_gate_list_is_comma_separated() {
        let cli =
            Cli::try_parse_from(["blastgate", "simulate", "--gates", "1,5,6"]).expect("parses");
        match cli.command {
            Command::Simulate(opts) => {
                assert_eq!(opts.gates, vec!["1", "5", "6"]);
                assert_eq!(opts.heartbeat_secs, 5);
            }
            _ => panic!("expected simulate subcommand"),
        }
    }

    #[test]
    fn rejects_unknown_tool_state() {
        assert!(Cli::try_parse_from(["blastgate", "tool", "jointer", "maybe"]).is_err());
    }
}
