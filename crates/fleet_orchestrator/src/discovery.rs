use crate::error::DiscoveryError;
use bridge_api::{msgs::TopicsResponse, topics, Feed, Outgoing, RobotId};
use serde_json::Value;
use std::collections::BTreeSet;

const REQUEST_PREFIX: &str = "discover-";

/// Builds a topic listing query with a fresh request id.
pub fn discovery_request() -> Outgoing {
    Outgoing::CallService {
        service: topics::TOPICS_SERVICE.to_owned(),
        id: format!("{REQUEST_PREFIX}{}", uuid::Uuid::new_v4()),
        args: None,
    }
}

/// Whether a service response answers one of our discovery queries.
pub fn is_discovery_response(service: &str, id: Option<&str>) -> bool {
    service == topics::TOPICS_SERVICE || id.is_some_and(|id| id.starts_with(REQUEST_PREFIX))
}

/// Robot identities advertised in a topic list. Only pose topics count: a robot publishing
/// odometry alone is not registered.
pub fn robot_ids_from_topics<S: AsRef<str>>(names: &[S]) -> BTreeSet<RobotId> {
    names
        .iter()
        .filter_map(|topic| topics::parse_topic(topic.as_ref()))
        .filter(|(_, feed)| *feed == Feed::Pose)
        .map(|(robot_id, _)| robot_id)
        .collect()
}

/// Decodes a `/rosapi/topics` service response into robot identities.
pub fn parse_discovery_response(values: &Value, result: bool) -> Result<BTreeSet<RobotId>, DiscoveryError> {
    if !result {
        return Err(DiscoveryError::ServiceFailed(
            values.as_str().unwrap_or("no detail").to_owned(),
        ));
    }
    let response: TopicsResponse = serde_json::from_value(values.clone())?;
    Ok(robot_ids_from_topics(&response.topics))
}
