use crate::config::StatusPolicy;
use crate::error::MalformedMessage;
use crate::snapshot::{FleetSnapshot, RobotView};
use crate::status::{derive_status, RobotStatus};
use crate::telemetry;
use crate::transport::ConnectionState;
use bridge_api::{msgs::Quaternion, Feed, RobotId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Last known pose estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub orientation: Quaternion,
    pub received_at: DateTime<Utc>,
}

impl Position {
    pub fn planar_distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Last known velocity sample, reduced to speeds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Motion {
    pub linear_speed: f64,
    pub angular_speed: f64,
    pub received_at: DateTime<Utc>,
}

/// Where the robot's active goal is, when known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GoalTarget {
    pub x: f64,
    pub y: f64,
}

/// Everything known about one robot. `status` is only ever written by [`Fleet::rescore`].
#[derive(Debug, Clone, Default)]
pub struct RobotRecord {
    pub position: Option<Position>,
    pub motion: Option<Motion>,
    pub has_pending_goal: bool,
    pub goal_target: Option<GoalTarget>,
    pub status: RobotStatus,
    pub last_update: Option<DateTime<Utc>>,
}

impl RobotRecord {
    /// Records a feed update. `last_update` never moves backwards.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.last_update = Some(self.last_update.map_or(now, |prev| prev.max(now)));
    }
}

/// A status that changed during a rescore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub robot_id: RobotId,
    pub from: RobotStatus,
    pub to: RobotStatus,
}

/// The registry of known robots and their records. Robots are never removed.
#[derive(Debug)]
pub struct Fleet {
    robots: BTreeMap<RobotId, RobotRecord>,
    policy: StatusPolicy,
    goal_reached_tolerance_m: f64,
}

impl Fleet {
    pub fn new(policy: StatusPolicy, goal_reached_tolerance_m: f64) -> Self {
        Self {
            robots: BTreeMap::new(),
            policy,
            goal_reached_tolerance_m,
        }
    }

    /// Registers a robot with an empty, offline record. Returns `false` if it was known.
    pub fn register(&mut self, robot_id: RobotId) -> bool {
        if self.robots.contains_key(&robot_id) {
            return false;
        }
        self.robots.insert(robot_id, RobotRecord::default());
        true
    }

    pub fn contains(&self, robot_id: &RobotId) -> bool {
        self.robots.contains_key(robot_id)
    }

    pub fn get(&self, robot_id: &RobotId) -> Option<&RobotRecord> {
        self.robots.get(robot_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &RobotId> {
        self.robots.keys()
    }

    pub fn len(&self) -> usize {
        self.robots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.robots.is_empty()
    }

    /// The only registered robot, if there is exactly one.
    pub fn sole_robot(&self) -> Option<&RobotId> {
        let mut ids = self.robots.keys();
        match (ids.next(), ids.next()) {
            (Some(id), None) => Some(id),
            _ => None,
        }
    }

    /// Folds one feed message into the robot's record, creating the record on first sight.
    pub fn ingest(
        &mut self,
        robot_id: &RobotId,
        feed: Feed,
        msg: &Value,
        now: DateTime<Utc>,
    ) -> Result<(), MalformedMessage> {
        let record = self.robots.entry(robot_id.clone()).or_default();
        match feed {
            Feed::Pose => telemetry::apply_pose(record, msg, now, self.goal_reached_tolerance_m),
            Feed::Odometry => telemetry::apply_odometry(record, msg, now),
            Feed::Goal => telemetry::apply_goal_notice(record, msg, now),
        }
    }

    /// Optimistic update after a goal was published. The next rescore yields `Busy`.
    pub fn mark_goal_dispatched(&mut self, robot_id: &RobotId, target: GoalTarget) -> bool {
        match self.robots.get_mut(robot_id) {
            Some(record) => {
                record.has_pending_goal = true;
                record.goal_target = Some(target);
                true
            }
            None => false,
        }
    }

    /// Recomputes every robot's status from scratch.
    pub fn rescore(&mut self, now: DateTime<Utc>) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        for (robot_id, record) in self.robots.iter_mut() {
            let status = derive_status(record, now, &self.policy);
            if status != record.status {
                changes.push(StatusChange {
                    robot_id: robot_id.clone(),
                    from: record.status,
                    to: status,
                });
                record.status = status;
            }
        }
        changes
    }

    /// Full view of the registry as of the last rescore.
    pub fn snapshot(&self, now: DateTime<Utc>, connection: ConnectionState) -> FleetSnapshot {
        let robots = self
            .robots
            .iter()
            .map(|(id, record)| (id.clone(), RobotView::from(record)))
            .collect();
        FleetSnapshot::new(now, connection, robots)
    }
}
