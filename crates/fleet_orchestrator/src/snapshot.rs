use crate::state::{Position, RobotRecord};
use crate::status::RobotStatus;
use crate::transport::ConnectionState;
use bridge_api::RobotId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// What the presentation layer gets to see of one robot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotView {
    pub status: RobotStatus,
    pub position: Option<Position>,
    pub last_update: Option<DateTime<Utc>>,
    pub has_pending_goal: bool,
}

impl From<&RobotRecord> for RobotView {
    fn from(record: &RobotRecord) -> Self {
        Self {
            status: record.status,
            position: record.position,
            last_update: record.last_update,
            has_pending_goal: record.has_pending_goal,
        }
    }
}

/// Dashboard counters. A busy robot is online but not available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetSummary {
    pub online: usize,
    pub available: usize,
    pub busy: usize,
    pub offline: usize,
    pub total: usize,
}

impl FleetSummary {
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a RobotStatus>) -> Self {
        let mut summary = Self::default();
        for status in statuses {
            summary.total += 1;
            match status {
                RobotStatus::Online => {
                    summary.online += 1;
                    summary.available += 1;
                }
                RobotStatus::Busy => {
                    summary.online += 1;
                    summary.busy += 1;
                }
                RobotStatus::Offline => summary.offline += 1,
            }
        }
        summary
    }
}

/// Immutable view of the whole registry at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetSnapshot {
    pub taken_at: DateTime<Utc>,
    pub connection: ConnectionState,
    pub robots: BTreeMap<RobotId, RobotView>,
    pub summary: FleetSummary,
}

impl FleetSnapshot {
    pub fn new(
        taken_at: DateTime<Utc>,
        connection: ConnectionState,
        robots: BTreeMap<RobotId, RobotView>,
    ) -> Self {
        let summary = FleetSummary::tally(robots.values().map(|view| &view.status));
        Self { taken_at, connection, robots, summary }
    }

    /// The snapshot served before the engine has published anything.
    pub fn empty() -> Self {
        Self::new(Utc::now(), ConnectionState::Disconnected, BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_busy_as_online_but_not_available() {
        let summary = FleetSummary::tally(&[
            RobotStatus::Online,
            RobotStatus::Busy,
            RobotStatus::Busy,
            RobotStatus::Offline,
        ]);
        assert_eq!(
            summary,
            FleetSummary { online: 3, available: 1, busy: 2, offline: 1, total: 4 }
        );
    }

    #[test]
    fn empty_snapshot_serializes_with_empty_robot_map() {
        let json = serde_json::to_value(FleetSnapshot::empty()).unwrap();
        assert_eq!(json["robots"], serde_json::json!({}));
        assert_eq!(json["connection"], "disconnected");
        assert_eq!(json["summary"]["total"], 0);
    }
}
