//! blastgate-core: pure domain logic for the blast gate coordinator.
//! Device model, topic grammar, liveness registry, tool→gate routing and
//! configuration schema. No tokio, no sockets, no wall clock: callers pass
//! `now` explicitly.

pub mod config;
pub mod error;
pub mod plan;
pub mod registry;
pub mod topic;
pub mod types;

pub use config::ShopConfig;
pub use error::{ConfigError, TopicParseError};
pub use plan::{ConvergenceCheck, GateCommandPlan, ToolGateMap, check_convergence};
pub use registry::{DeviceClassifier, DeviceRegistry};
pub use topic::{Topic, TopicCategory, TopicLayout};
pub use types::{DeviceKind, DeviceRecord, GateCommand};
