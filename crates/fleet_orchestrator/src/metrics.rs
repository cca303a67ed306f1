use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::snapshot::FleetSummary;

/// A container for all Prometheus metric collectors of the fleet orchestrator.
///
/// This struct is designed to be wrapped in an `Arc` and shared between the transport
/// session, the fleet engine and the HTTP server.
pub struct Metrics {
    pub registry: Registry,
    /// Current bridge connection state (0 disconnected, 1 connecting, 2 connected, 3 error).
    pub connection_state: IntGauge,
    /// Total number of connection attempts, reconnections included.
    pub connection_attempts_total: IntCounter,
    /// Total number of failed attempts and dropped connections.
    pub connection_failures_total: IntCounter,
    /// Number of robots in the registry.
    pub robots_known: IntGauge,
    pub robots_online: IntGauge,
    pub robots_busy: IntGauge,
    pub robots_offline: IntGauge,
    /// Total number of feed messages folded into robot records.
    pub telemetry_messages_total: IntCounter,
    /// Total number of frames or feed payloads dropped as unusable.
    pub malformed_messages_total: IntCounter,
    pub discovery_queries_total: IntCounter,
    pub discovery_failures_total: IntCounter,
    pub goals_dispatched_total: IntCounter,
    pub goals_rejected_total: IntCounter,
}

impl Metrics {
    /// Creates a new `Metrics` struct, initializing and registering all collectors.
    pub fn new() -> Self {
        // Create a custom registry to avoid conflicts with default metrics.
        let registry = Registry::new_custom(Some("fleet_orchestrator".into()), None)
            .expect("Failed to create custom metrics registry");

        // A helper macro to create, register, and return a metric collector.
        macro_rules! reg {
            ($kind:ident, $name:expr, $help:expr) => {{
                let collector = $kind::new($name, $help).expect("Invalid metric definition");
                registry
                    .register(Box::new(collector.clone()))
                    .expect("Failed to register metric");
                collector
            }};
        }

        Self {
            connection_state: reg!(IntGauge, "connection_state", "Bridge connection state"),
            connection_attempts_total: reg!(
                IntCounter,
                "connection_attempts_total",
                "Total number of bridge connection attempts"
            ),
            connection_failures_total: reg!(
                IntCounter,
                "connection_failures_total",
                "Total number of failed or dropped bridge connections"
            ),
            robots_known: reg!(IntGauge, "robots_known", "Number of registered robots"),
            robots_online: reg!(IntGauge, "robots_online", "Robots that are online and idle"),
            robots_busy: reg!(IntGauge, "robots_busy", "Robots that are moving or hold a goal"),
            robots_offline: reg!(IntGauge, "robots_offline", "Robots with stale or no telemetry"),
            telemetry_messages_total: reg!(
                IntCounter,
                "telemetry_messages_total",
                "Total number of telemetry messages applied"
            ),
            malformed_messages_total: reg!(
                IntCounter,
                "malformed_messages_total",
                "Total number of unusable frames and payloads dropped"
            ),
            discovery_queries_total: reg!(
                IntCounter,
                "discovery_queries_total",
                "Total number of topic listing queries sent"
            ),
            discovery_failures_total: reg!(
                IntCounter,
                "discovery_failures_total",
                "Total number of failed topic listing queries"
            ),
            goals_dispatched_total: reg!(
                IntCounter,
                "goals_dispatched_total",
                "Total number of navigation goals published"
            ),
            goals_rejected_total: reg!(
                IntCounter,
                "goals_rejected_total",
                "Total number of navigation goals refused or not published"
            ),
            registry,
        }
    }

    /// Creates an `axum::Router` that serves the metrics on the `/metrics` endpoint.
    pub fn router(&self) -> Router {
        let registry = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let metric_families = registry.gather();
                    let mut buffer = Vec::new();
                    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buffer) {
                        tracing::error!(error = %e, "Failed to encode metrics");
                        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                    }
                    String::from_utf8_lossy(&buffer).into_owned().into_response()
                }
            }),
        )
    }

    /// Sets the robot gauges from the latest fleet counters.
    pub fn update_fleet(&self, summary: &FleetSummary) {
        self.robots_known.set(summary.total as i64);
        self.robots_online.set(summary.available as i64);
        self.robots_busy.set(summary.busy as i64);
        self.robots_offline.set(summary.offline as i64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
