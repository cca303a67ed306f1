//! The single connection to the rosbridge server.
//!
//! A [`TransportSession`] task owns the WebSocket. It forwards parsed frames and connection
//! state changes to the fleet engine, in receipt order, and drains the outbound queue fed by
//! [`TransportHandle::send`]. Subscriptions do not survive a drop; the engine re-subscribes
//! whenever it sees `Connected` again.

use crate::config::TransportConfig;
use crate::error::{ConnectionError, MalformedMessage, PublishError};
use crate::metrics::Metrics;
use bridge_api::{Incoming, Outgoing};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

const OUTBOUND_QUEUE_CAPACITY: usize = 256;
const EVENT_QUEUE_CAPACITY: usize = 1024;

type BridgeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_gauge(self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Error => 3,
        }
    }
}

/// What the session reports to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    State(ConnectionState),
    Frame(Incoming),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Connect,
    Disconnect,
}

/// Fixed-interval retry, bounded by consecutive failures.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    interval: Duration,
    max_failures: u32,
    failures: u32,
}

impl ReconnectPolicy {
    pub fn new(interval: Duration, max_failures: u32) -> Self {
        Self { interval, max_failures, failures: 0 }
    }

    /// Counts a failure and returns the delay before the next attempt, or `None` once the
    /// bound is reached.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        (self.failures < self.max_failures).then_some(self.interval)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Cloneable access to the session: state, outbound queue and connect/disconnect.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    outbound_tx: mpsc::Sender<Outgoing>,
    control_tx: mpsc::Sender<Control>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl TransportHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Queues an operation for the current connection. Never waits.
    pub fn send(&self, op: Outgoing) -> Result<(), PublishError> {
        if self.state() != ConnectionState::Connected {
            return Err(PublishError::NotConnected);
        }
        self.outbound_tx.try_send(op).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PublishError::SessionClosed,
        })
    }

    /// Starts connecting again, resetting the failure count. Used after reconnection gave up.
    pub fn connect(&self) {
        self.control(Control::Connect);
    }

    /// Closes the connection and cancels any pending reconnection.
    pub fn disconnect(&self) {
        self.control(Control::Disconnect);
    }

    fn control(&self, control: Control) {
        if let Err(e) = self.control_tx.try_send(control) {
            tracing::warn!(?control, error = %e, "Transport session did not accept control request");
        }
    }
}

enum Ended {
    Dropped(ConnectionError),
    DisconnectRequested,
    Shutdown,
}

pub struct TransportSession {
    config: TransportConfig,
    metrics: Arc<Metrics>,
    policy: ReconnectPolicy,
    outbound_rx: mpsc::Receiver<Outgoing>,
    control_rx: mpsc::Receiver<Control>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::Sender<TransportEvent>,
    shutdown_rx: watch::Receiver<()>,
}

impl TransportSession {
    /// Spawns the session task. It starts connecting immediately.
    pub fn spawn(
        config: TransportConfig,
        metrics: Arc<Metrics>,
        shutdown_rx: watch::Receiver<()>,
    ) -> (TransportHandle, mpsc::Receiver<TransportEvent>, JoinHandle<()>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let session = TransportSession {
            policy: ReconnectPolicy::new(config.reconnect_interval, config.max_reconnect_attempts),
            config,
            metrics,
            outbound_rx,
            control_rx,
            state_tx,
            events_tx,
            shutdown_rx,
        };
        let handle = TransportHandle { outbound_tx, control_tx, state_rx };
        (handle, events_rx, tokio::spawn(session.run()))
    }

    async fn run(mut self) {
        tracing::info!(url = %self.config.bridge_url, "Transport session started.");
        let mut active = true;

        loop {
            if !active {
                tokio::select! {
                    ctrl = self.control_rx.recv() => match ctrl {
                        Some(Control::Connect) => {
                            self.policy.reset();
                            active = true;
                        }
                        Some(Control::Disconnect) => {}
                        None => break,
                    },
                    _ = self.shutdown_rx.changed() => break,
                }
                continue;
            }

            self.set_state(ConnectionState::Connecting).await;
            self.metrics.connection_attempts_total.inc();
            let attempt = tokio::select! {
                res = open(&self.config.bridge_url, self.config.connect_timeout) => res,
                _ = self.shutdown_rx.changed() => break,
            };

            let failure = match attempt {
                Ok(socket) => {
                    tracing::info!(url = %self.config.bridge_url, "Connected to bridge");
                    self.policy.reset();
                    self.discard_stale_outbound();
                    self.set_state(ConnectionState::Connected).await;
                    match self.pump(socket).await {
                        Ended::Dropped(e) => {
                            tracing::warn!(error = %e, "Bridge connection dropped");
                            self.set_state(ConnectionState::Disconnected).await;
                            e
                        }
                        Ended::DisconnectRequested => {
                            tracing::info!("Disconnected from bridge on request");
                            self.set_state(ConnectionState::Disconnected).await;
                            active = false;
                            continue;
                        }
                        Ended::Shutdown => break,
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.config.bridge_url, error = %e, "Failed to connect to bridge");
                    self.set_state(ConnectionState::Error).await;
                    e
                }
            };
            self.metrics.connection_failures_total.inc();

            match self.policy.record_failure() {
                Some(delay) => {
                    tracing::info!(
                        attempt = self.policy.failures(),
                        max_attempts = self.config.max_reconnect_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnection"
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        ctrl = self.control_rx.recv() => match ctrl {
                            Some(Control::Connect) => self.policy.reset(),
                            Some(Control::Disconnect) => {
                                self.set_state(ConnectionState::Disconnected).await;
                                active = false;
                            }
                            None => break,
                        },
                        _ = self.shutdown_rx.changed() => break,
                    }
                }
                None => {
                    tracing::error!(
                        error = %failure,
                        attempts = self.policy.failures(),
                        "Reconnection attempts exhausted; waiting for an explicit reconnect"
                    );
                    self.set_state(ConnectionState::Error).await;
                    active = false;
                }
            }
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        self.metrics.connection_state.set(ConnectionState::Disconnected.as_gauge());
        tracing::info!("Transport session has shut down.");
    }

    /// Moves frames both ways until the connection ends.
    async fn pump(&mut self, mut socket: BridgeSocket) -> Ended {
        loop {
            tokio::select! {
                frame = socket.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.forward_frame(&text).await,
                    Some(Ok(Message::Close(_))) | None => return Ended::Dropped(ConnectionError::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Ended::Dropped(e.into()),
                },
                Some(op) = self.outbound_rx.recv() => match serde_json::to_string(&op) {
                    Ok(text) => {
                        if let Err(e) = socket.send(Message::Text(text)).await {
                            return Ended::Dropped(e.into());
                        }
                    }
                    Err(e) => tracing::error!(error = %e, topic = ?op.topic(), "Failed to encode outbound operation"),
                },
                ctrl = self.control_rx.recv() => match ctrl {
                    Some(Control::Connect) => {}
                    Some(Control::Disconnect) | None => {
                        let _ = socket.close(None).await;
                        return Ended::DisconnectRequested;
                    }
                },
                _ = self.shutdown_rx.changed() => {
                    let _ = socket.close(None).await;
                    return Ended::Shutdown;
                }
            }
        }
    }

    async fn forward_frame(&mut self, text: &str) {
        match Incoming::from_text(text).map_err(MalformedMessage::from) {
            Ok(frame) => {
                let _ = self.events_tx.send(TransportEvent::Frame(frame)).await;
            }
            Err(e) => {
                self.metrics.malformed_messages_total.inc();
                tracing::debug!(error = %e, "Dropping unusable bridge frame");
            }
        }
    }

    /// Operations queued for a previous connection are meaningless on a new one.
    fn discard_stale_outbound(&mut self) {
        let mut discarded = 0usize;
        while self.outbound_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "Discarded operations queued before reconnecting");
        }
    }

    async fn set_state(&mut self, state: ConnectionState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        self.state_tx.send_replace(state);
        self.metrics.connection_state.set(state.as_gauge());
        let _ = self.events_tx.send(TransportEvent::State(state)).await;
    }
}

async fn open(url: &Url, connect_timeout: Duration) -> Result<BridgeSocket, ConnectionError> {
    match timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ConnectionError::Timeout(connect_timeout)),
    }
}

/// In-process stand-in for the session, for driving the engine in tests.
#[cfg(test)]
pub(crate) struct FakeBridge {
    pub state_tx: watch::Sender<ConnectionState>,
    pub outbound_rx: mpsc::Receiver<Outgoing>,
    pub control_rx: mpsc::Receiver<Control>,
    pub events_tx: mpsc::Sender<TransportEvent>,
}

#[cfg(test)]
impl FakeBridge {
    pub(crate) fn new(
        outbound_capacity: usize,
    ) -> (TransportHandle, mpsc::Receiver<TransportEvent>, FakeBridge) {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);
        let (control_tx, control_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(64);
        let handle = TransportHandle { outbound_tx, control_tx, state_rx };
        (handle, events_rx, FakeBridge { state_tx, outbound_rx, control_rx, events_tx })
    }

    pub(crate) async fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        self.events_tx.send(TransportEvent::State(state)).await.unwrap();
    }

    pub(crate) async fn deliver(&self, frame: Incoming) {
        self.events_tx.send(TransportEvent::Frame(frame)).await.unwrap();
    }

    pub(crate) async fn next_op(&mut self) -> Outgoing {
        tokio::time::timeout(Duration::from_secs(5), self.outbound_rx.recv())
            .await
            .expect("timed out waiting for an outbound operation")
            .expect("outbound queue closed")
    }
}
