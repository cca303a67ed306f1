use crate::config::FleetConfig;
use crate::discovery;
use crate::dispatch::{self, GoalRequest, TaskRequest};
use crate::error::DispatchError;
use crate::metrics::Metrics;
use crate::snapshot::FleetSnapshot;
use crate::state::Fleet;
use crate::transport::{ConnectionState, TransportEvent, TransportHandle, TransportSession};
use bridge_api::{topics, Feed, Incoming, Outgoing, RobotId};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Operator requests handled inside the engine loop.
pub enum Command {
    Dispatch {
        request: GoalRequest,
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    AssignTask {
        request: TaskRequest,
        reply: oneshot::Sender<Result<GoalRequest, DispatchError>>,
    },
}

/// The context object handed to everything outside the engine: snapshot reads, goal
/// dispatch and connection control.
#[derive(Debug, Clone)]
pub struct FleetHandle {
    commands_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<Arc<FleetSnapshot>>,
    transport: TransportHandle,
}

impl FleetHandle {
    /// The full registry as of the last engine update. Empty before the first discovery.
    pub fn snapshot(&self) -> Arc<FleetSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<FleetSnapshot>> {
        self.snapshot_rx.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Restarts connecting after reconnection gave up.
    pub fn reconnect(&self) {
        self.transport.connect();
    }

    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    /// Publishes a navigation goal. Returns once the goal is queued for the bridge; there is
    /// no delivery confirmation.
    pub async fn dispatch(&self, request: GoalRequest) -> Result<(), DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.commands_tx
            .send(Command::Dispatch { request, reply })
            .await
            .map_err(|_| DispatchError::EngineStopped)?;
        rx.await.map_err(|_| DispatchError::EngineStopped)?
    }

    /// Validates a task and dispatches its goal. Returns the goal that was sent.
    pub async fn assign_task(&self, request: TaskRequest) -> Result<GoalRequest, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.commands_tx
            .send(Command::AssignTask { request, reply })
            .await
            .map_err(|_| DispatchError::EngineStopped)?;
        rx.await.map_err(|_| DispatchError::EngineStopped)?
    }
}

/// Bookkeeping that only holds for one connection. Cleared on every state change.
#[derive(Debug, Default)]
struct Epoch {
    subscribed: HashSet<RobotId>,
    routes: HashMap<String, (RobotId, Feed)>,
    advertised: HashSet<String>,
}

/// Sole owner of all robot records.
pub struct FleetEngine {
    config: FleetConfig,
    fleet: Fleet,
    transport: TransportHandle,
    connection: ConnectionState,
    epoch: Epoch,
    metrics: Arc<Metrics>,
    snapshot_tx: watch::Sender<Arc<FleetSnapshot>>,
}

impl FleetEngine {
    /// Spawns the transport session and the engine. The returned task completes once both
    /// have shut down.
    pub fn spawn(
        config: FleetConfig,
        metrics: Arc<Metrics>,
        shutdown_rx: watch::Receiver<()>,
    ) -> (FleetHandle, JoinHandle<()>) {
        let (transport, events_rx, session_task) =
            TransportSession::spawn(config.transport.clone(), metrics.clone(), shutdown_rx.clone());
        let (handle, engine_task) = Self::start(config, transport, events_rx, metrics, shutdown_rx);

        let task = tokio::spawn(async move {
            if let Err(e) = engine_task.await {
                tracing::error!(error = %e, "Fleet engine task panicked.");
            }
            if let Err(e) = session_task.await {
                tracing::error!(error = %e, "Transport session task panicked.");
            }
        });
        (handle, task)
    }

    /// Spawns the engine loop on top of an existing transport.
    pub(crate) fn start(
        config: FleetConfig,
        transport: TransportHandle,
        events_rx: mpsc::Receiver<TransportEvent>,
        metrics: Arc<Metrics>,
        shutdown_rx: watch::Receiver<()>,
    ) -> (FleetHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(FleetSnapshot::empty()));

        let engine = FleetEngine {
            fleet: Fleet::new(config.status, config.goal_reached_tolerance_m),
            config,
            transport: transport.clone(),
            connection: ConnectionState::Disconnected,
            epoch: Epoch::default(),
            metrics,
            snapshot_tx,
        };
        let handle = FleetHandle { commands_tx, snapshot_rx, transport };
        let task = tokio::spawn(engine.run(events_rx, commands_rx, shutdown_rx));
        (handle, task)
    }

    async fn run(
        mut self,
        mut events_rx: mpsc::Receiver<TransportEvent>,
        mut commands_rx: mpsc::Receiver<Command>,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        tracing::info!("Fleet engine started.");

        // First ticks are one period out: discovery on connect is driven by the state event.
        let start = Instant::now();
        let mut status_tick =
            interval_at(start + self.config.status_interval, self.config.status_interval);
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut discovery_tick =
            interval_at(start + self.config.discovery_interval, self.config.discovery_interval);
        discovery_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::info!("Shutdown signal received, stopping fleet engine.");
                    break;
                }
                event = events_rx.recv() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => {
                        tracing::warn!("Transport session ended; stopping fleet engine.");
                        break;
                    }
                },
                Some(command) = commands_rx.recv() => self.handle_command(command),
                _ = status_tick.tick() => self.rescore(Utc::now()),
                _ = discovery_tick.tick() => self.request_discovery(),
            }
        }

        self.transport.disconnect();
        tracing::info!("Fleet engine has shut down.");
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::State(state) => self.on_connection_state(state),
            TransportEvent::Frame(frame) => self.on_frame(frame),
        }
    }

    /// Every state change starts a new epoch. On `Connected`, known robots are re-subscribed
    /// and discovery runs at once.
    fn on_connection_state(&mut self, state: ConnectionState) {
        tracing::info!(from = ?self.connection, to = ?state, "Bridge connection state changed");
        self.connection = state;
        self.epoch = Epoch::default();

        if state == ConnectionState::Connected {
            let known: Vec<RobotId> = self.fleet.ids().cloned().collect();
            for robot_id in &known {
                self.subscribe_robot(robot_id);
            }
            self.request_discovery();
        }
        self.publish_snapshot(Utc::now());
    }

    fn on_frame(&mut self, frame: Incoming) {
        match frame {
            Incoming::Publish { topic, msg } => self.on_telemetry(&topic, &msg),
            Incoming::ServiceResponse { service, id, values, result } => {
                if discovery::is_discovery_response(&service, id.as_deref()) {
                    self.on_discovery_response(&values, result);
                } else {
                    tracing::debug!(service = %service, ?id, "Ignoring unrelated service response");
                }
            }
            Incoming::Status { level, msg } => match level.as_str() {
                "error" | "warning" => tracing::warn!(level = %level, msg = %msg, "Bridge reported a problem"),
                _ => tracing::debug!(level = %level, msg = %msg, "Bridge status"),
            },
        }
    }

    fn on_telemetry(&mut self, topic: &str, msg: &Value) {
        let Some((robot_id, feed)) = self.epoch.routes.get(topic).cloned() else {
            tracing::trace!(topic, "Ignoring message on a topic this epoch did not subscribe to");
            return;
        };
        match self.fleet.ingest(&robot_id, feed, msg, Utc::now()) {
            Ok(()) => self.metrics.telemetry_messages_total.inc(),
            Err(e) => {
                self.metrics.malformed_messages_total.inc();
                tracing::debug!(robot_id = %robot_id, topic, error = %e, "Dropping malformed telemetry");
            }
        }
    }

    fn on_discovery_response(&mut self, values: &Value, result: bool) {
        match discovery::parse_discovery_response(values, result) {
            Ok(robot_ids) => {
                let mut registered = 0usize;
                for robot_id in robot_ids {
                    if self.fleet.register(robot_id.clone()) {
                        tracing::info!(robot_id = %robot_id, "Discovered robot");
                        registered += 1;
                    }
                    if !self.epoch.subscribed.contains(&robot_id) {
                        self.subscribe_robot(&robot_id);
                    }
                }
                if registered > 0 {
                    self.publish_snapshot(Utc::now());
                }
            }
            Err(e) => {
                self.metrics.discovery_failures_total.inc();
                tracing::warn!(error = %e, "Robot discovery failed; retrying at next poll");
            }
        }
    }

    fn request_discovery(&mut self) {
        if self.connection != ConnectionState::Connected {
            return;
        }
        match self.transport.send(discovery::discovery_request()) {
            Ok(()) => self.metrics.discovery_queries_total.inc(),
            Err(e) => {
                self.metrics.discovery_failures_total.inc();
                tracing::warn!(error = %e, "Failed to send discovery query");
            }
        }
    }

    /// Opens the pose, odometry and goal-notice subscriptions of one robot. Feeds already
    /// opened in this epoch are skipped, so a call after a partial failure only sends the rest.
    fn subscribe_robot(&mut self, robot_id: &RobotId) {
        for feed in Feed::ALL {
            let topic = topics::topic_for(robot_id, feed);
            if self.epoch.routes.contains_key(&topic) {
                continue;
            }
            let op = Outgoing::Subscribe {
                topic: topic.clone(),
                msg_type: feed.msg_type().to_owned(),
                id: Some(format!("subscribe:{topic}")),
            };
            if let Err(e) = self.transport.send(op) {
                tracing::warn!(robot_id = %robot_id, topic = %topic, error = %e, "Failed to subscribe");
                return;
            }
            self.epoch.routes.insert(topic, (robot_id.clone(), feed));
        }
        self.epoch.subscribed.insert(robot_id.clone());
        tracing::info!(robot_id = %robot_id, "Subscribed to robot telemetry");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dispatch { request, reply } => {
                let result = self.dispatch(&request);
                let _ = reply.send(result);
            }
            Command::AssignTask { request, reply } => {
                let result = match dispatch::resolve_task(
                    &request,
                    self.connection,
                    &self.fleet,
                    self.config.already_at_goal_tolerance_m,
                ) {
                    Ok(goal) => self.dispatch(&goal).map(|()| goal),
                    Err(reason) => {
                        self.metrics.goals_rejected_total.inc();
                        tracing::warn!(code = reason.code(), reason = %reason, "Task rejected");
                        Err(reason.into())
                    }
                };
                if let Ok(goal) = &result {
                    tracing::info!(
                        robot_id = %goal.robot_id,
                        description = %request.description,
                        "Task assigned"
                    );
                }
                let _ = reply.send(result);
            }
        }
    }

    fn dispatch(&mut self, request: &GoalRequest) -> Result<(), DispatchError> {
        let result = self.try_dispatch(request);
        match &result {
            Ok(()) => {
                self.metrics.goals_dispatched_total.inc();
                tracing::info!(robot_id = %request.robot_id, x = request.x, y = request.y, "Navigation goal sent");
            }
            Err(e) => {
                self.metrics.goals_rejected_total.inc();
                tracing::warn!(robot_id = %request.robot_id, code = e.code(), error = %e, "Navigation goal not sent");
            }
        }
        result
    }

    fn try_dispatch(&mut self, request: &GoalRequest) -> Result<(), DispatchError> {
        dispatch::validate_goal(request, self.connection, &self.fleet)?;

        let command = dispatch::goal_command(request, Utc::now())?;
        let topic = topics::topic_for(&request.robot_id, Feed::Goal);
        if !self.epoch.advertised.contains(&topic) {
            self.transport.send(dispatch::advertise_goal_topic(&request.robot_id))?;
            self.epoch.advertised.insert(topic);
        }
        self.transport.send(command)?;

        // Optimistic: the next rescore reports the robot busy without waiting for a notice.
        self.fleet.mark_goal_dispatched(&request.robot_id, request.target());
        Ok(())
    }

    fn rescore(&mut self, now: DateTime<Utc>) {
        for change in self.fleet.rescore(now) {
            tracing::info!(
                robot_id = %change.robot_id,
                from = change.from.as_str(),
                to = change.to.as_str(),
                "Robot status changed"
            );
        }
        self.publish_snapshot(now);
    }

    fn publish_snapshot(&mut self, now: DateTime<Utc>) {
        let snapshot = self.fleet.snapshot(now, self.connection);
        self.metrics.update_fleet(&snapshot.summary);
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectReason;
    use crate::status::RobotStatus;
    use crate::transport::{Control, FakeBridge};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        handle: FleetHandle,
        bridge: FakeBridge,
        metrics: Arc<Metrics>,
        shutdown_tx: Option<watch::Sender<()>>,
        task: JoinHandle<()>,
    }

    fn quiet_config() -> FleetConfig {
        FleetConfig {
            discovery_interval: Duration::from_secs(3600),
            ..FleetConfig::default()
        }
    }

    fn start_with(config: FleetConfig, outbound_capacity: usize) -> Harness {
        let (transport, events_rx, bridge) = FakeBridge::new(outbound_capacity);
        let metrics = Arc::new(Metrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let (handle, task) = FleetEngine::start(config, transport, events_rx, metrics.clone(), shutdown_rx);
        Harness { handle, bridge, metrics, shutdown_tx: Some(shutdown_tx), task }
    }

    fn start() -> Harness {
        start_with(quiet_config(), 64)
    }

    fn topics_response(topics: &[&str]) -> Incoming {
        Incoming::ServiceResponse {
            service: "/rosapi/topics".into(),
            id: Some("discover-test".into()),
            values: json!({ "topics": topics }),
            result: true,
        }
    }

    async fn subscribed_topics(bridge: &mut FakeBridge, count: usize) -> Vec<String> {
        let mut topics = Vec::new();
        for _ in 0..count {
            match bridge.next_op().await {
                Outgoing::Subscribe { topic, .. } => topics.push(topic),
                other => panic!("expected a subscription, got {other:?}"),
            }
        }
        topics
    }

    /// Connects and answers the first discovery query with `topics`.
    async fn connect_and_discover(h: &mut Harness, topics: &[&str]) {
        h.bridge.set_state(ConnectionState::Connected).await;
        assert!(matches!(h.bridge.next_op().await, Outgoing::CallService { .. }));
        h.bridge.deliver(topics_response(topics)).await;
    }

    async fn wait_for_snapshot(handle: &FleetHandle, mut ready: impl FnMut(&FleetSnapshot) -> bool) {
        let mut snapshots = handle.watch_snapshots();
        tokio::time::timeout(Duration::from_secs(5), snapshots.wait_for(|s| ready(&**s)))
            .await
            .expect("timed out waiting for a snapshot")
            .expect("engine stopped publishing snapshots");
    }

    /// Waits until `count` feed messages were applied or dropped as malformed.
    async fn wait_for_feed_messages(metrics: &Metrics, count: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while metrics.telemetry_messages_total.get() + metrics.malformed_messages_total.get() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out waiting for telemetry");
    }

    fn pose(x: f64, y: f64) -> Value {
        json!({"pose": {"pose": {"position": {"x": x, "y": y, "z": 0.0}}}})
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_is_empty_before_discovery() {
        let h = start();
        let snapshot = h.handle.snapshot();
        assert!(snapshot.robots.is_empty());
        assert_eq!(snapshot.summary.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_queries_once_until_the_repoll_interval() {
        let mut h = start_with(FleetConfig::default(), 64);
        h.bridge.set_state(ConnectionState::Connected).await;
        assert!(matches!(h.bridge.next_op().await, Outgoing::CallService { .. }));

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(h.bridge.outbound_rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(h.bridge.next_op().await, Outgoing::CallService { .. }));
        assert_eq!(h.metrics.discovery_queries_total.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_registers_pose_publishers_and_subscribes_once() {
        let mut h = start();
        connect_and_discover(&mut h, &["/a/amcl_pose", "/amcl_pose", "/b/odom"]).await;

        let topics = subscribed_topics(&mut h.bridge, 6).await;
        assert_eq!(
            topics,
            ["/a/amcl_pose", "/a/odom", "/a/goal_pose", "/amcl_pose", "/odom", "/goal_pose"]
        );
        let ids: Vec<_> = h.handle.snapshot().robots.keys().cloned().collect();
        assert_eq!(ids, vec![RobotId::new("a"), RobotId::unnamespaced()]);

        // Known robots are not subscribed again; only the newcomer is.
        h.bridge
            .deliver(topics_response(&["/a/amcl_pose", "/amcl_pose", "/c/amcl_pose"]))
            .await;
        wait_for_snapshot(&h.handle, |s| s.robots.len() == 3).await;
        let topics = subscribed_topics(&mut h.bridge, 3).await;
        assert_eq!(topics, ["/c/amcl_pose", "/c/odom", "/c/goal_pose"]);
        assert!(h.bridge.outbound_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_subscription_is_completed_without_duplicates() {
        let mut h = start_with(quiet_config(), 4);
        connect_and_discover(&mut h, &["/a/amcl_pose", "/b/amcl_pose"]).await;
        wait_for_snapshot(&h.handle, |s| s.robots.len() == 2).await;

        // The queue holds four ops: robot b's odometry and goal feeds did not fit.
        let topics = subscribed_topics(&mut h.bridge, 4).await;
        assert_eq!(topics, ["/a/amcl_pose", "/a/odom", "/a/goal_pose", "/b/amcl_pose"]);

        h.bridge.deliver(topics_response(&["/a/amcl_pose", "/b/amcl_pose"])).await;
        let topics = subscribed_topics(&mut h.bridge, 2).await;
        assert_eq!(topics, ["/b/odom", "/b/goal_pose"]);
        assert!(h.bridge.outbound_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_marks_busy_until_pose_reaches_goal() {
        let mut h = start();
        connect_and_discover(&mut h, &["/a/amcl_pose"]).await;
        subscribed_topics(&mut h.bridge, 3).await;
        h.bridge
            .deliver(Incoming::Publish { topic: "/a/amcl_pose".into(), msg: pose(0.0, 0.0) })
            .await;
        wait_for_feed_messages(&h.metrics, 1).await;

        h.handle.dispatch(GoalRequest { robot_id: RobotId::new("a"), x: 1.0, y: 2.0 }).await.unwrap();

        match h.bridge.next_op().await {
            Outgoing::Advertise { topic, msg_type } => {
                assert_eq!(topic, "/a/goal_pose");
                assert_eq!(msg_type, "geometry_msgs/msg/PoseStamped");
            }
            other => panic!("expected an advertisement, got {other:?}"),
        }
        match h.bridge.next_op().await {
            Outgoing::Publish { topic, msg } => {
                assert_eq!(topic, "/a/goal_pose");
                assert_eq!(msg["pose"]["position"], json!({"x": 1.0, "y": 2.0, "z": 0.0}));
            }
            other => panic!("expected a goal publish, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let snapshot = h.handle.snapshot();
        let robot = &snapshot.robots[&RobotId::new("a")];
        assert_eq!(robot.status, RobotStatus::Busy);
        assert!(robot.has_pending_goal);
        assert_eq!(h.metrics.goals_dispatched_total.get(), 1);

        h.bridge
            .deliver(Incoming::Publish { topic: "/a/amcl_pose".into(), msg: pose(0.9, 1.8) })
            .await;
        wait_for_feed_messages(&h.metrics, 2).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let snapshot = h.handle.snapshot();
        let robot = &snapshot.robots[&RobotId::new("a")];
        assert!(!robot.has_pending_goal);
        assert_eq!(robot.status, RobotStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_rejections_are_distinct() {
        let mut h = start();
        let goal = GoalRequest { robot_id: RobotId::new("a"), x: 1.0, y: 2.0 };
        assert_eq!(
            h.handle.dispatch(goal.clone()).await,
            Err(DispatchError::Rejected(RejectReason::NotConnected))
        );

        connect_and_discover(&mut h, &[]).await;
        assert_eq!(
            h.handle.dispatch(goal).await,
            Err(DispatchError::Rejected(RejectReason::UnknownRobot(RobotId::new("a"))))
        );
        assert_eq!(h.metrics.goals_rejected_total.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_drives_status_through_ticks() {
        let mut h = start();
        connect_and_discover(&mut h, &["/amcl_pose"]).await;
        subscribed_topics(&mut h.bridge, 3).await;

        h.bridge
            .deliver(Incoming::Publish { topic: "/ghost/odom".into(), msg: json!({}) })
            .await;
        h.bridge
            .deliver(Incoming::Publish {
                topic: "/odom".into(),
                msg: json!({"twist": {"twist": {"linear": {"x": 0.2, "y": 0.0, "z": 0.0}, "angular": {"z": 0.0}}}}),
            })
            .await;
        h.bridge
            .deliver(Incoming::Publish { topic: "/amcl_pose".into(), msg: json!({"pose": null}) })
            .await;
        wait_for_feed_messages(&h.metrics, 2).await;

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.robots.len(), 1);
        assert_eq!(snapshot.robots[&RobotId::unnamespaced()].status, RobotStatus::Busy);
        assert_eq!(snapshot.summary.busy, 1);
        assert_eq!(h.metrics.telemetry_messages_total.get(), 1);
        assert_eq!(h.metrics.malformed_messages_total.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnection_resubscribes_known_robots() {
        let mut h = start();
        connect_and_discover(&mut h, &["/a/amcl_pose"]).await;
        subscribed_topics(&mut h.bridge, 3).await;

        h.bridge.set_state(ConnectionState::Disconnected).await;
        h.bridge.set_state(ConnectionState::Connecting).await;
        h.bridge.set_state(ConnectionState::Connected).await;

        let topics = subscribed_topics(&mut h.bridge, 3).await;
        assert_eq!(topics, ["/a/amcl_pose", "/a/odom", "/a/goal_pose"]);
        assert!(matches!(h.bridge.next_op().await, Outgoing::CallService { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn task_assignment_selects_sole_robot() {
        let mut h = start();
        connect_and_discover(&mut h, &["/amcl_pose"]).await;
        subscribed_topics(&mut h.bridge, 3).await;

        let goal = h
            .handle
            .assign_task(TaskRequest {
                description: "inspect dock".into(),
                robot_id: None,
                goal: Some(dispatch::GoalPoint { x: 2.0, y: 0.5 }),
            })
            .await
            .unwrap();
        assert_eq!(goal.robot_id, RobotId::unnamespaced());
        assert!(matches!(h.bridge.next_op().await, Outgoing::Advertise { .. }));
        match h.bridge.next_op().await {
            Outgoing::Publish { topic, .. } => assert_eq!(topic, "/goal_pose"),
            other => panic!("expected a goal publish, got {other:?}"),
        }

        let missing = h
            .handle
            .assign_task(TaskRequest { description: "".into(), robot_id: None, goal: None })
            .await;
        assert_eq!(missing, Err(DispatchError::Rejected(RejectReason::MissingGoal)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_engine_and_disconnects() {
        let mut h = start();
        drop(h.shutdown_tx.take());
        tokio::time::timeout(Duration::from_secs(5), &mut h.task).await.unwrap().unwrap();
        assert_eq!(h.bridge.control_rx.recv().await, Some(Control::Disconnect));

        let goal = GoalRequest { robot_id: RobotId::new("a"), x: 0.0, y: 0.0 };
        assert_eq!(h.handle.dispatch(goal).await, Err(DispatchError::EngineStopped));
    }
}
