//! Operator-facing HTTP API, served next to `/metrics`.

use crate::dispatch::{GoalRequest, TaskRequest};
use crate::engine::FleetHandle;
use crate::error::{DispatchError, RejectReason};
use crate::metrics::Metrics;
use crate::snapshot::FleetSnapshot;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

/// Builds the full router: fleet API plus the Prometheus endpoint.
pub fn router(fleet: FleetHandle, metrics: &Metrics) -> Router {
    Router::new()
        .route("/api/fleet", get(fleet_snapshot))
        .route("/api/connection", get(connection_state))
        .route("/api/connection/reconnect", post(reconnect))
        .route("/api/goals", post(dispatch_goal))
        .route("/api/tasks", post(assign_task))
        .with_state(fleet)
        .merge(metrics.router())
}

async fn fleet_snapshot(State(fleet): State<FleetHandle>) -> Json<FleetSnapshot> {
    Json(FleetSnapshot::clone(&fleet.snapshot()))
}

async fn connection_state(State(fleet): State<FleetHandle>) -> Json<serde_json::Value> {
    Json(json!({ "state": fleet.connection_state() }))
}

async fn reconnect(State(fleet): State<FleetHandle>) -> StatusCode {
    tracing::info!("Reconnect requested over HTTP");
    fleet.reconnect();
    StatusCode::ACCEPTED
}

async fn dispatch_goal(
    State(fleet): State<FleetHandle>,
    Json(request): Json<GoalRequest>,
) -> Result<StatusCode, ApiError> {
    fleet.dispatch(request).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn assign_task(
    State(fleet): State<FleetHandle>,
    Json(request): Json<TaskRequest>,
) -> Result<(StatusCode, Json<GoalRequest>), ApiError> {
    let goal = fleet.assign_task(request).await?;
    Ok((StatusCode::ACCEPTED, Json(goal)))
}

/// A [`DispatchError`] rendered as `{"error": <code>, "reason": <message>}`.
#[derive(Debug)]
pub struct ApiError(DispatchError);

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            DispatchError::Rejected(reason) => match reason {
                RejectReason::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
                RejectReason::UnknownRobot(_) => StatusCode::NOT_FOUND,
                RejectReason::AlreadyAtGoal { .. } => StatusCode::CONFLICT,
                RejectReason::InvalidCoordinates
                | RejectReason::MissingGoal
                | RejectReason::MissingDescription
                | RejectReason::MissingRobot => StatusCode::UNPROCESSABLE_ENTITY,
            },
            DispatchError::Publish(_) | DispatchError::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.0.code(), "reason": self.0.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
