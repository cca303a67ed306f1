//! Feed handlers. Each one folds a raw message into a [`RobotRecord`], touching only the
//! fields the message actually carries. None of them writes `status`.

use crate::error::MalformedMessage;
use crate::state::{GoalTarget, Motion, Position, RobotRecord};
use bridge_api::msgs::Quaternion;
use chrono::{DateTime, Utc};
use serde_json::Value;

fn number(msg: &Value, pointer: &str) -> Option<f64> {
    msg.pointer(pointer).and_then(Value::as_f64)
}

/// `geometry_msgs/PoseWithCovarianceStamped`.
pub fn apply_pose(
    record: &mut RobotRecord,
    msg: &Value,
    now: DateTime<Utc>,
    goal_reached_tolerance_m: f64,
) -> Result<(), MalformedMessage> {
    let x = number(msg, "/pose/pose/position/x");
    let y = number(msg, "/pose/pose/position/y");
    let z = number(msg, "/pose/pose/position/z");
    let qx = number(msg, "/pose/pose/orientation/x");
    let qy = number(msg, "/pose/pose/orientation/y");
    let qz = number(msg, "/pose/pose/orientation/z");
    let qw = number(msg, "/pose/pose/orientation/w");

    if [x, y, z, qx, qy, qz, qw].iter().all(Option::is_none) {
        return Err(MalformedMessage::NoUsableField { feed: "pose" });
    }

    let mut position = record.position.unwrap_or(Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        orientation: Quaternion::IDENTITY,
        received_at: now,
    });
    position.x = x.unwrap_or(position.x);
    position.y = y.unwrap_or(position.y);
    position.z = z.unwrap_or(position.z);
    position.orientation.x = qx.unwrap_or(position.orientation.x);
    position.orientation.y = qy.unwrap_or(position.orientation.y);
    position.orientation.z = qz.unwrap_or(position.orientation.z);
    position.orientation.w = qw.unwrap_or(position.orientation.w);
    position.received_at = now;

    record.position = Some(position);
    record.touch(now);

    if let Some(target) = record.goal_target.filter(|_| record.has_pending_goal) {
        if position.planar_distance_to(target.x, target.y) <= goal_reached_tolerance_m {
            record.has_pending_goal = false;
            record.goal_target = None;
        }
    }
    Ok(())
}

/// `nav_msgs/Odometry`. Linear speed is the norm of the 3-axis linear velocity, angular speed
/// the magnitude of the yaw rate.
pub fn apply_odometry(
    record: &mut RobotRecord,
    msg: &Value,
    now: DateTime<Utc>,
) -> Result<(), MalformedMessage> {
    let linear = [
        number(msg, "/twist/twist/linear/x"),
        number(msg, "/twist/twist/linear/y"),
        number(msg, "/twist/twist/linear/z"),
    ];
    let angular_z = number(msg, "/twist/twist/angular/z");

    let has_linear = linear.iter().any(Option::is_some);
    if !has_linear && angular_z.is_none() {
        return Err(MalformedMessage::NoUsableField { feed: "odometry" });
    }

    let previous = record.motion;
    let linear_speed = if has_linear {
        linear.iter().map(|c| c.unwrap_or(0.0).powi(2)).sum::<f64>().sqrt()
    } else {
        previous.map_or(0.0, |m| m.linear_speed)
    };
    let angular_speed = angular_z
        .map(f64::abs)
        .unwrap_or_else(|| previous.map_or(0.0, |m| m.angular_speed));

    record.motion = Some(Motion { linear_speed, angular_speed, received_at: now });
    record.touch(now);
    Ok(())
}

/// `geometry_msgs/PoseStamped` on the goal topic: the robot's planner holds an active goal.
/// Goals from any origin count, not only the ones this process dispatched.
pub fn apply_goal_notice(
    record: &mut RobotRecord,
    msg: &Value,
    now: DateTime<Utc>,
) -> Result<(), MalformedMessage> {
    if !msg.is_object() {
        return Err(MalformedMessage::NoUsableField { feed: "goal" });
    }

    record.has_pending_goal = true;
    if let (Some(x), Some(y)) = (number(msg, "/pose/position/x"), number(msg, "/pose/position/y")) {
        record.goal_target = Some(GoalTarget { x, y });
    }
    record.touch(now);
    Ok(())
}
