//! blastgate-runtime: async side of the blast gate coordinator.
//! MQTT adapter, shared registry handle, dispatcher, liveness sweeper,
//! tool-switch coordinator, manual override, status RPC and bench simulator.

pub mod bus;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod dispatch;
pub mod manual;
pub mod mqtt;
pub mod registry;
pub mod server;
pub mod simulator;
pub mod sweeper;
