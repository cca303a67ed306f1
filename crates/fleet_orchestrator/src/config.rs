use anyhow::{bail, Context};
use clap::Parser;
use std::{net::SocketAddr, time::Duration};
use url::Url;

/// `fleet_orchestrator` - connectivity and state aggregation for a fleet of mobile robots.
///
/// Connects to a rosbridge WebSocket, discovers robots by their pose topics, folds their
/// telemetry into one status per robot and publishes navigation goals on request.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// WebSocket URL of the rosbridge server.
    #[arg(long, env = "ROSBRIDGE_URL", default_value = "ws://localhost:9090")]
    pub bridge_url: String,

    /// Listen address for the HTTP API and the Prometheus `/metrics` endpoint.
    #[arg(long, env = "FLEET_HTTP_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub http_listen_addr: SocketAddr,

    /// Fixed delay between reconnection attempts.
    #[arg(long, env = "RECONNECT_INTERVAL_MS", default_value_t = 5000)]
    pub reconnect_interval_ms: u64,

    /// Consecutive connection failures after which reconnection stops until restarted.
    #[arg(long, env = "MAX_RECONNECT_ATTEMPTS", default_value_t = 5)]
    pub max_reconnect_attempts: u32,

    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// How often the topic list is re-polled for robots that joined late.
    #[arg(long, env = "DISCOVERY_INTERVAL_MS", default_value_t = 3000)]
    pub discovery_interval_ms: u64,

    /// How often every robot's status is recomputed.
    #[arg(long, env = "STATUS_INTERVAL_MS", default_value_t = 1000)]
    pub status_interval_ms: u64,

    /// Silence after which a robot is reported offline.
    #[arg(long, env = "STALE_AFTER_MS", default_value_t = 5000)]
    pub stale_after_ms: u64,

    /// Linear speed (m/s) above which a robot counts as moving.
    #[arg(long, env = "LINEAR_SPEED_THRESHOLD", default_value_t = 0.05)]
    pub linear_speed_threshold: f64,

    /// Angular speed (rad/s) above which a robot counts as turning.
    #[arg(long, env = "ANGULAR_SPEED_THRESHOLD", default_value_t = 0.05)]
    pub angular_speed_threshold: f64,

    /// Distance (m) from the goal at which a pending goal counts as reached.
    #[arg(long, env = "GOAL_REACHED_TOLERANCE_M", default_value_t = 0.4)]
    pub goal_reached_tolerance_m: f64,

    /// Distance (m) under which a new task is refused because the robot is already there.
    #[arg(long, env = "ALREADY_AT_GOAL_TOLERANCE_M", default_value_t = 0.2)]
    pub already_at_goal_tolerance_m: f64,
}

/// Reconnection behaviour of the transport session.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub bridge_url: Url,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
}

/// Thresholds of the status policy.
#[derive(Debug, Clone, Copy)]
pub struct StatusPolicy {
    pub stale_after: chrono::Duration,
    pub linear_speed_threshold: f64,
    pub angular_speed_threshold: f64,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            stale_after: chrono::Duration::milliseconds(5000),
            linear_speed_threshold: 0.05,
            angular_speed_threshold: 0.05,
        }
    }
}

/// Everything the fleet engine needs, validated.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub transport: TransportConfig,
    pub discovery_interval: Duration,
    pub status_interval: Duration,
    pub status: StatusPolicy,
    pub goal_reached_tolerance_m: f64,
    pub already_at_goal_tolerance_m: f64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig {
                bridge_url: Url::parse("ws://localhost:9090").expect("static URL is valid"),
                reconnect_interval: Duration::from_secs(5),
                max_reconnect_attempts: 5,
                connect_timeout: Duration::from_secs(5),
            },
            discovery_interval: Duration::from_secs(3),
            status_interval: Duration::from_secs(1),
            status: StatusPolicy::default(),
            goal_reached_tolerance_m: 0.4,
            already_at_goal_tolerance_m: 0.2,
        }
    }
}

impl Config {
    /// Validates the raw options and converts them into a [`FleetConfig`].
    pub fn fleet_config(&self) -> anyhow::Result<FleetConfig> {
        let bridge_url = Url::parse(&self.bridge_url)
            .with_context(|| format!("Failed to parse ROSBRIDGE_URL '{}'", self.bridge_url))?;
        if !matches!(bridge_url.scheme(), "ws" | "wss") {
            bail!("ROSBRIDGE_URL must use ws:// or wss://, got '{}'", bridge_url.scheme());
        }
        if self.max_reconnect_attempts == 0 {
            bail!("MAX_RECONNECT_ATTEMPTS must be at least 1");
        }
        for (name, ms) in [
            ("RECONNECT_INTERVAL_MS", self.reconnect_interval_ms),
            ("CONNECT_TIMEOUT_MS", self.connect_timeout_ms),
            ("DISCOVERY_INTERVAL_MS", self.discovery_interval_ms),
            ("STATUS_INTERVAL_MS", self.status_interval_ms),
            ("STALE_AFTER_MS", self.stale_after_ms),
        ] {
            if ms == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        for (name, value) in [
            ("LINEAR_SPEED_THRESHOLD", self.linear_speed_threshold),
            ("ANGULAR_SPEED_THRESHOLD", self.angular_speed_threshold),
            ("GOAL_REACHED_TOLERANCE_M", self.goal_reached_tolerance_m),
            ("ALREADY_AT_GOAL_TOLERANCE_M", self.already_at_goal_tolerance_m),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be a finite, non-negative number");
            }
        }
        let stale_after_ms = i64::try_from(self.stale_after_ms)
            .context("STALE_AFTER_MS is out of range")?;

        Ok(FleetConfig {
            transport: TransportConfig {
                bridge_url,
                reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
                max_reconnect_attempts: self.max_reconnect_attempts,
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            },
            discovery_interval: Duration::from_millis(self.discovery_interval_ms),
            status_interval: Duration::from_millis(self.status_interval_ms),
            status: StatusPolicy {
                stale_after: chrono::Duration::milliseconds(stale_after_ms),
                linear_speed_threshold: self.linear_speed_threshold,
                angular_speed_threshold: self.angular_speed_threshold,
            },
            goal_reached_tolerance_m: self.goal_reached_tolerance_m,
            already_at_goal_tolerance_m: self.already_at_goal_tolerance_m,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["fleet_orchestrator"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_fleet_config_default() {
        let config = parse(&[]).fleet_config().unwrap();
        let default = FleetConfig::default();
        assert_eq!(config.transport.bridge_url, default.transport.bridge_url);
        assert_eq!(config.transport.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.transport.max_reconnect_attempts, 5);
        assert_eq!(config.discovery_interval, Duration::from_secs(3));
        assert_eq!(config.status_interval, Duration::from_secs(1));
        assert_eq!(config.status.stale_after, chrono::Duration::seconds(5));
        assert_eq!(config.status.linear_speed_threshold, 0.05);
    }

    #[test]
    fn rejects_non_websocket_url() {
        let err = parse(&["--bridge-url", "http://localhost:9090"]).fleet_config().unwrap_err();
        assert!(err.to_string().contains("ws://"));
    }

    #[test]
    fn rejects_zero_attempts_and_negative_thresholds() {
        assert!(parse(&["--max-reconnect-attempts", "0"]).fleet_config().is_err());
        assert!(parse(&["--linear-speed-threshold=-1"]).fleet_config().is_err());
    }
}
