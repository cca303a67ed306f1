//! ROS message shapes the orchestrator builds or fully deserializes.
//!
//! Telemetry payloads are read leaf by leaf from `serde_json::Value` instead, so that a
//! partial message still yields whatever fields it carries.

use serde::{Deserialize, Serialize};

/// Frame every goal is expressed in.
pub const MAP_FRAME: &str = "map";

/// `builtin_interfaces/Time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    pub sec: i64,
    pub nanosec: u32,
}

impl Time {
    pub fn from_unix_millis(millis: i64) -> Self {
        Self {
            sec: millis.div_euclid(1000),
            nanosec: (millis.rem_euclid(1000) as u32) * 1_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub frame_id: String,
    pub stamp: Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

/// `geometry_msgs/PoseStamped`, used for navigation goals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    pub header: Header,
    pub pose: Pose,
}

impl PoseStamped {
    /// A planar goal in the map frame, facing along +x.
    pub fn goal(x: f64, y: f64, stamp: Time) -> Self {
        Self {
            header: Header { frame_id: MAP_FRAME.to_owned(), stamp },
            pose: Pose {
                position: Point { x, y, z: 0.0 },
                orientation: Quaternion::IDENTITY,
            },
        }
    }
}

/// `rosapi/GetTopics` response values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TopicsResponse {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
}
