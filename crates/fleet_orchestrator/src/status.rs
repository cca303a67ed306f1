use crate::config::StatusPolicy;
use crate::state::RobotRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotStatus {
    Online,
    Busy,
    #[default]
    Offline,
}

impl RobotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RobotStatus::Online => "online",
            RobotStatus::Busy => "busy",
            RobotStatus::Offline => "offline",
        }
    }
}

/// Derives a robot's status from its raw telemetry. Level-triggered: the result depends only
/// on the record and `now`, never on the previous status.
///
/// Precedence:
/// 1. silent for longer than `stale_after` → `Offline`
/// 2. moving, turning or holding a pending goal → `Busy`
/// 3. otherwise `Online`
///
/// A robot that has never sent telemetry is `Busy` if a goal was dispatched to it, else
/// `Offline`.
pub fn derive_status(record: &RobotRecord, now: DateTime<Utc>, policy: &StatusPolicy) -> RobotStatus {
    let Some(last_update) = record.last_update else {
        return if record.has_pending_goal {
            RobotStatus::Busy
        } else {
            RobotStatus::Offline
        };
    };

    if now.signed_duration_since(last_update) > policy.stale_after {
        return RobotStatus::Offline;
    }

    let moving = record.motion.as_ref().is_some_and(|m| {
        m.linear_speed > policy.linear_speed_threshold
            || m.angular_speed > policy.angular_speed_threshold
    });

    if moving || record.has_pending_goal {
        RobotStatus::Busy
    } else {
        RobotStatus::Online
    }
}
