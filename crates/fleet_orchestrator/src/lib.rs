//! Connectivity and state aggregation for a fleet of mobile robots behind a rosbridge server.

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod http;
pub mod metrics;
pub mod snapshot;
pub mod state;
pub mod status;
pub mod telemetry;
pub mod transport;

pub use config::{Config, FleetConfig};
pub use dispatch::{GoalRequest, TaskRequest};
pub use engine::{FleetEngine, FleetHandle};
pub use error::{DispatchError, RejectReason};
pub use snapshot::{FleetSnapshot, FleetSummary, RobotView};
pub use status::RobotStatus;
pub use transport::ConnectionState;
