use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the single robot that publishes without a namespace.
pub const DEFAULT_ROBOT: &str = "default";

/// rosapi service that lists every advertised topic.
pub const TOPICS_SERVICE: &str = "/rosapi/topics";

/// Opaque, stable robot identity derived from a topic namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotId(String);

impl RobotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The sentinel for the unnamespaced robot.
    pub fn unnamespaced() -> Self {
        Self(DEFAULT_ROBOT.to_owned())
    }

    pub fn is_unnamespaced(&self) -> bool {
        self.0 == DEFAULT_ROBOT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RobotId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The three per-robot telemetry feeds. The goal feed doubles as the command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    Pose,
    Odometry,
    Goal,
}

impl Feed {
    pub const ALL: [Feed; 3] = [Feed::Pose, Feed::Odometry, Feed::Goal];

    pub fn suffix(self) -> &'static str {
        match self {
            Feed::Pose => "amcl_pose",
            Feed::Odometry => "odom",
            Feed::Goal => "goal_pose",
        }
    }

    /// Message type used when subscribing to the feed.
    pub fn msg_type(self) -> &'static str {
        match self {
            Feed::Pose => "geometry_msgs/PoseWithCovarianceStamped",
            Feed::Odometry => "nav_msgs/Odometry",
            Feed::Goal => "geometry_msgs/PoseStamped",
        }
    }
}

/// Message type advertised for outbound goal commands.
pub const GOAL_COMMAND_TYPE: &str = "geometry_msgs/msg/PoseStamped";

/// `/amcl_pose` for the unnamespaced robot, `/R/amcl_pose` for robot `R`.
pub fn topic_for(robot: &RobotId, feed: Feed) -> String {
    if robot.is_unnamespaced() {
        format!("/{}", feed.suffix())
    } else {
        format!("/{}/{}", robot.as_str(), feed.suffix())
    }
}

/// Splits a topic name into the robot and feed it belongs to.
///
/// Everything between the leading `/` and the trailing `/<suffix>` is the namespace, so
/// nested namespaces stay intact (`/fleet/a/odom` belongs to `fleet/a`).
pub fn parse_topic(topic: &str) -> Option<(RobotId, Feed)> {
    let rest = topic.strip_prefix('/')?;
    Feed::ALL.into_iter().find_map(|feed| {
        if rest == feed.suffix() {
            return Some((RobotId::unnamespaced(), feed));
        }
        let namespace = rest.strip_suffix(feed.suffix())?.strip_suffix('/')?;
        (!namespace.is_empty()).then(|| (RobotId::new(namespace), feed))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_follow_namespace_convention() {
        let default = RobotId::unnamespaced();
        let a = RobotId::new("a");
        assert_eq!(topic_for(&default, Feed::Pose), "/amcl_pose");
        assert_eq!(topic_for(&default, Feed::Goal), "/goal_pose");
        assert_eq!(topic_for(&a, Feed::Odometry), "/a/odom");
        assert_eq!(topic_for(&a, Feed::Goal), "/a/goal_pose");
    }

    #[test]
    fn parse_topic_recovers_robot_and_feed() {
        assert_eq!(
            parse_topic("/amcl_pose"),
            Some((RobotId::unnamespaced(), Feed::Pose))
        );
        assert_eq!(parse_topic("/b/odom"), Some((RobotId::new("b"), Feed::Odometry)));
        assert_eq!(
            parse_topic("/fleet/a/goal_pose"),
            Some((RobotId::new("fleet/a"), Feed::Goal))
        );
    }

    #[test]
    fn parse_topic_rejects_unrelated_names() {
        assert_eq!(parse_topic("/rosout"), None);
        assert_eq!(parse_topic("amcl_pose"), None);
        assert_eq!(parse_topic("//amcl_pose"), None);
        assert_eq!(parse_topic("/a/amcl_pose_raw"), None);
        assert_eq!(parse_topic("/aodom"), None);
    }
}
