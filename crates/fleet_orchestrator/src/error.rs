use bridge_api::RobotId;
use thiserror::Error;

/// The bridge could not be reached, or the connection dropped.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection attempt timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed by the bridge")]
    Closed,
}

/// The topic listing query failed. Retried at the next re-poll.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("topic listing service reported failure: {0}")]
    ServiceFailed(String),
    #[error("topic listing response is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A frame or feed payload that could not be used. Dropped, never propagated to callers.
#[derive(Debug, Error)]
pub enum MalformedMessage {
    #[error("frame is not a known bridge operation: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("no usable field in {feed} message")]
    NoUsableField { feed: &'static str },
}

/// An outbound operation could not be handed to the transport.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    #[error("not connected to the bridge")]
    NotConnected,
    #[error("outbound queue is full")]
    QueueFull,
    #[error("transport session has shut down")]
    SessionClosed,
}

/// Why a goal or task was refused before anything was published.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("not connected to the bridge")]
    NotConnected,
    #[error("goal coordinates must be finite numbers")]
    InvalidCoordinates,
    #[error("robot '{0}' is not registered")]
    UnknownRobot(RobotId),
    #[error("no goal selected")]
    MissingGoal,
    #[error("task description is empty")]
    MissingDescription,
    #[error("no robot selected")]
    MissingRobot,
    #[error("robot is already at the goal ({distance_cm} cm away)")]
    AlreadyAtGoal { distance_cm: u32 },
}

impl RejectReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::NotConnected => "not_connected",
            RejectReason::InvalidCoordinates => "invalid_coordinates",
            RejectReason::UnknownRobot(_) => "unknown_robot",
            RejectReason::MissingGoal => "missing_goal",
            RejectReason::MissingDescription => "missing_description",
            RejectReason::MissingRobot => "missing_robot",
            RejectReason::AlreadyAtGoal { .. } => "already_at_goal",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("goal rejected: {0}")]
    Rejected(RejectReason),
    #[error("goal could not be published: {0}")]
    Publish(#[from] PublishError),
    #[error("goal could not be encoded: {0}")]
    Encode(String),
    #[error("fleet engine is not running")]
    EngineStopped,
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Rejected(reason) => reason.code(),
            DispatchError::Publish(_) => "publish_failed",
            DispatchError::Encode(_) => "encode_failed",
            DispatchError::EngineStopped => "engine_stopped",
        }
    }
}

impl From<RejectReason> for DispatchError {
    fn from(reason: RejectReason) -> Self {
        DispatchError::Rejected(reason)
    }
}
