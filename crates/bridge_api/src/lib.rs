//! Wire types for the rosbridge WebSocket protocol as spoken by the fleet orchestrator.
//!
//! The topic naming convention and message shapes are fixed by the robots; nothing in this
//! crate is negotiable at runtime.

pub mod msgs;
pub mod ops;
pub mod topics;

pub use ops::{Incoming, Outgoing};
pub use topics::{Feed, RobotId};
