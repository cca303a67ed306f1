//! Goal dispatch is fire-and-forget: the bridge offers no acknowledgement, so a published
//! goal is assumed accepted. The robot's own goal-notice feed is the only later confirmation,
//! and a lost command goes unnoticed beyond the publish-time check.

use crate::error::{DispatchError, RejectReason};
use crate::state::{Fleet, GoalTarget};
use crate::transport::ConnectionState;
use bridge_api::{
    msgs::{PoseStamped, Time},
    topics::{self, GOAL_COMMAND_TYPE},
    Feed, Outgoing, RobotId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A navigation goal for one robot, in map coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRequest {
    pub robot_id: RobotId,
    pub x: f64,
    pub y: f64,
}

impl GoalRequest {
    pub fn target(&self) -> GoalTarget {
        GoalTarget { x: self.x, y: self.y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GoalPoint {
    pub x: f64,
    pub y: f64,
}

/// An operator task as submitted from the task form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub robot_id: Option<RobotId>,
    #[serde(default)]
    pub goal: Option<GoalPoint>,
}

/// Dispatch preconditions, checked in order: connected, finite coordinates, known robot.
pub fn validate_goal(
    request: &GoalRequest,
    connection: ConnectionState,
    fleet: &Fleet,
) -> Result<(), RejectReason> {
    if connection != ConnectionState::Connected {
        return Err(RejectReason::NotConnected);
    }
    if !request.x.is_finite() || !request.y.is_finite() {
        return Err(RejectReason::InvalidCoordinates);
    }
    if !fleet.contains(&request.robot_id) {
        return Err(RejectReason::UnknownRobot(request.robot_id.clone()));
    }
    Ok(())
}

/// Turns a task into a goal request. A missing robot selection falls back to the only
/// registered robot.
pub fn resolve_task(
    request: &TaskRequest,
    connection: ConnectionState,
    fleet: &Fleet,
    already_at_goal_tolerance_m: f64,
) -> Result<GoalRequest, RejectReason> {
    let goal = request.goal.ok_or(RejectReason::MissingGoal)?;
    if request.description.trim().is_empty() {
        return Err(RejectReason::MissingDescription);
    }
    let robot_id = request
        .robot_id
        .clone()
        .or_else(|| fleet.sole_robot().cloned())
        .ok_or(RejectReason::MissingRobot)?;
    if connection != ConnectionState::Connected {
        return Err(RejectReason::NotConnected);
    }

    if let Some(position) = fleet.get(&robot_id).and_then(|record| record.position) {
        let distance = position.planar_distance_to(goal.x, goal.y);
        if distance < already_at_goal_tolerance_m {
            return Err(RejectReason::AlreadyAtGoal {
                distance_cm: (distance * 100.0).round() as u32,
            });
        }
    }

    Ok(GoalRequest { robot_id, x: goal.x, y: goal.y })
}

/// Advertisement for a robot's goal command topic.
pub fn advertise_goal_topic(robot_id: &RobotId) -> Outgoing {
    Outgoing::Advertise {
        topic: topics::topic_for(robot_id, Feed::Goal),
        msg_type: GOAL_COMMAND_TYPE.to_owned(),
    }
}

/// The goal command, stamped with `now`.
pub fn goal_command(request: &GoalRequest, now: DateTime<Utc>) -> Result<Outgoing, DispatchError> {
    let goal = PoseStamped::goal(request.x, request.y, Time::from_unix_millis(now.timestamp_millis()));
    let msg = serde_json::to_value(goal).map_err(|e| {
        tracing::error!(robot_id = %request.robot_id, error = %e, "Failed to encode goal command");
        DispatchError::Encode(e.to_string())
    })?;
    Ok(Outgoing::Publish { topic: topics::topic_for(&request.robot_id, Feed::Goal), msg })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatusPolicy;
    use serde_json::json;

    fn fleet_with(ids: &[&str]) -> Fleet {
        let mut fleet = Fleet::new(StatusPolicy::default(), 0.4);
        for id in ids {
            fleet.register(RobotId::new(*id));
        }
        fleet
    }

    fn goal(robot: &str, x: f64, y: f64) -> GoalRequest {
        GoalRequest { robot_id: RobotId::new(robot), x, y }
    }

    #[test]
    fn preconditions_are_checked_in_order() {
        let fleet = fleet_with(&["a"]);
        assert_eq!(
            validate_goal(&goal("ghost", f64::NAN, 0.0), ConnectionState::Disconnected, &fleet),
            Err(RejectReason::NotConnected)
        );
        assert_eq!(
            validate_goal(&goal("ghost", f64::NAN, 0.0), ConnectionState::Connected, &fleet),
            Err(RejectReason::InvalidCoordinates)
        );
        assert_eq!(
            validate_goal(&goal("ghost", 1.0, 0.0), ConnectionState::Connected, &fleet),
            Err(RejectReason::UnknownRobot(RobotId::new("ghost")))
        );
        assert_eq!(validate_goal(&goal("a", 1.0, 2.0), ConnectionState::Connected, &fleet), Ok(()));
    }

    #[test]
    fn unknown_robot_reason_differs_from_not_connected() {
        assert_ne!(
            RejectReason::UnknownRobot(RobotId::new("x")).code(),
            RejectReason::NotConnected.code()
        );
    }

    #[test]
    fn goal_command_targets_robot_goal_topic() {
        let now = DateTime::from_timestamp(1_700_000_000, 500_000_000).unwrap();
        let Outgoing::Publish { topic, msg } = goal_command(&goal("a", 1.0, 2.0), now).unwrap() else {
            panic!("goal command must be a publish");
        };
        assert_eq!(topic, "/a/goal_pose");
        assert_eq!(msg["header"]["frame_id"], "map");
        assert_eq!(msg["header"]["stamp"], json!({"sec": 1_700_000_000i64, "nanosec": 500_000_000u32}));
        assert_eq!(msg["pose"]["position"], json!({"x": 1.0, "y": 2.0, "z": 0.0}));
        assert_eq!(msg["pose"]["orientation"]["w"], 1.0);

        let Outgoing::Publish { topic, .. } = goal_command(&goal("default", 0.0, 0.0), now).unwrap() else {
            panic!("goal command must be a publish");
        };
        assert_eq!(topic, "/goal_pose");
    }

    #[test]
    fn task_validation_order_and_sole_robot_selection() {
        let fleet = fleet_with(&["a"]);
        let mut task = TaskRequest { description: "deliver".into(), robot_id: None, goal: None };
        assert_eq!(
            resolve_task(&task, ConnectionState::Connected, &fleet, 0.2),
            Err(RejectReason::MissingGoal)
        );

        task.goal = Some(GoalPoint { x: 3.0, y: 4.0 });
        task.description = "   ".into();
        assert_eq!(
            resolve_task(&task, ConnectionState::Connected, &fleet, 0.2),
            Err(RejectReason::MissingDescription)
        );

        task.description = "deliver".into();
        assert_eq!(
            resolve_task(&task, ConnectionState::Disconnected, &fleet, 0.2),
            Err(RejectReason::NotConnected)
        );
        assert_eq!(
            resolve_task(&task, ConnectionState::Connected, &fleet, 0.2),
            Ok(goal("a", 3.0, 4.0))
        );

        let crowded = fleet_with(&["a", "b"]);
        assert_eq!(
            resolve_task(&task, ConnectionState::Connected, &crowded, 0.2),
            Err(RejectReason::MissingRobot)
        );
    }

    #[test]
    fn task_rejected_when_robot_already_there() {
        let mut fleet = fleet_with(&["a"]);
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        fleet
            .ingest(
                &RobotId::new("a"),
                Feed::Pose,
                &json!({"pose": {"pose": {"position": {"x": 3.0, "y": 4.1}}}}),
                now,
            )
            .unwrap();
        let task = TaskRequest {
            description: "deliver".into(),
            robot_id: Some(RobotId::new("a")),
            goal: Some(GoalPoint { x: 3.0, y: 4.0 }),
        };
        assert_eq!(
            resolve_task(&task, ConnectionState::Connected, &fleet, 0.2),
            Err(RejectReason::AlreadyAtGoal { distance_cm: 10 })
        );
    }
}
