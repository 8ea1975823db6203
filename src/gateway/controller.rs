//! Gateway Session Controller
//!
//! Drives one logical gateway session across any number of socket
//! connections: endpoint resolution, Identify/Resume handshake selection,
//! opcode routing, heartbeat supervision and reconnection.
//!
//! All protocol handling happens on a single driver task, so inbound frames
//! are processed strictly in wire order. The heartbeat timer is the only
//! other timeline; its reports carry the connection generation and reports
//! from superseded connections are dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use url::Url;

use super::dispatch::DispatchRegistry;
use super::endpoint::{gateway_url, EndpointResolver};
use super::heartbeat::{self, HeartbeatEvent, HeartbeatScheduler};
use super::messages::{
    GatewayReceive, GatewaySend, HelloPayload, IdentifyPayload, IdentifyProperties, OpCode,
    ReadyPayload, ResumePayload,
};
use super::session::{SessionState, SharedSession};
use super::transport::{Connection, Connector, FrameSender, TransportEvent};
use crate::config::Settings;
use crate::infrastructure::metrics;
use crate::shared::error::{GatewayError, Result};

/// Lifecycle stage of the gateway session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStage {
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Active,
    Reconnecting,
    /// The server invalidated the session; no further reconnects
    Terminated,
    /// The owner shut the session down
    Disconnected,
}

impl ConnectionStage {
    pub const ALL: [ConnectionStage; 8] = [
        ConnectionStage::Connecting,
        ConnectionStage::AwaitingHello,
        ConnectionStage::Identifying,
        ConnectionStage::Resuming,
        ConnectionStage::Active,
        ConnectionStage::Reconnecting,
        ConnectionStage::Terminated,
        ConnectionStage::Disconnected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStage::Connecting => "connecting",
            ConnectionStage::AwaitingHello => "awaiting_hello",
            ConnectionStage::Identifying => "identifying",
            ConnectionStage::Resuming => "resuming",
            ConnectionStage::Active => "active",
            ConnectionStage::Reconnecting => "reconnecting",
            ConnectionStage::Terminated => "terminated",
            ConnectionStage::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection was torn down and rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    TransportClosed,
    MissedAck,
    ServerRequested,
    ResumableInvalidSession,
    SendFailed,
}

impl ReconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconnectReason::TransportClosed => "transport_closed",
            ReconnectReason::MissedAck => "missed_ack",
            ReconnectReason::ServerRequested => "server_requested",
            ReconnectReason::ResumableInvalidSession => "invalid_session",
            ReconnectReason::SendFailed => "send_failed",
        }
    }
}

/// Protocol parameters for the session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub token: String,
    pub version: u8,
    pub encoding: String,
    pub properties: IdentifyProperties,
    /// Delay before retrying a failed connection attempt
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            token: settings.gateway.token.clone(),
            version: settings.gateway.version,
            encoding: settings.gateway.encoding.clone(),
            properties: IdentifyProperties {
                os: settings.identify.os.clone(),
                browser: settings.identify.browser.clone(),
                device: settings.identify.device.clone(),
            },
            reconnect_delay: settings.gateway.reconnect_delay(),
        }
    }
}

/// Gateway client: registers subscribers and starts sessions
pub struct GatewayClient {
    config: Arc<ClientConfig>,
    resolver: Arc<dyn EndpointResolver>,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<DispatchRegistry>,
    session: SharedSession,
    in_flight: Arc<AtomicBool>,
}

impl GatewayClient {
    pub fn new(
        config: ClientConfig,
        resolver: Arc<dyn EndpointResolver>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            resolver,
            connector,
            dispatcher: Arc::new(DispatchRegistry::new()),
            session: SessionState::shared(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a subscriber for a named dispatch event.
    pub fn on_dispatch<F>(&self, event_name: impl Into<String>, handler: F)
    where
        F: Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(event_name, handler);
    }

    /// Register a subscriber for every dispatch event.
    pub fn on_any<F>(&self, handler: F)
    where
        F: Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_all(handler);
    }

    /// Snapshot of the current session state.
    pub fn session(&self) -> SessionState {
        self.session.lock().clone()
    }

    /// Resolve the gateway endpoint and start the session driver.
    ///
    /// Returns as soon as the driver is running; the handshake happens in
    /// the background. Endpoint resolution failure here is fatal and no
    /// connection is attempted.
    pub async fn connect(&self) -> Result<GatewayHandle> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(GatewayError::AlreadyConnected);
        }

        let endpoint = match resolve_endpoint(self.resolver.as_ref(), &self.config).await {
            Ok(url) => url,
            Err(e) => {
                self.in_flight.store(false, Ordering::SeqCst);
                tracing::error!(error = %e, "Failed to resolve gateway endpoint");
                return Err(e);
            }
        };
        tracing::info!(url = %endpoint, "Resolved gateway endpoint");

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (heartbeat_tx, heartbeat_rx) = mpsc::unbounded_channel();
        let (stage_tx, stage_rx) = watch::channel(ConnectionStage::Connecting);

        let driver = SessionDriver {
            config: self.config.clone(),
            resolver: self.resolver.clone(),
            connector: self.connector.clone(),
            dispatcher: self.dispatcher.clone(),
            session: self.session.clone(),
            control: control_rx,
            heartbeat_tx,
            heartbeat_rx,
            stage: stage_tx,
            heartbeat: HeartbeatScheduler::new(),
            generation: 0,
            hello_seen: false,
        };

        let in_flight = self.in_flight.clone();
        let task = tokio::spawn(async move {
            let result = driver.run(endpoint).await;
            in_flight.store(false, Ordering::SeqCst);
            result
        });

        Ok(GatewayHandle {
            control: control_tx,
            stage: stage_rx,
            task,
        })
    }
}

async fn resolve_endpoint(resolver: &dyn EndpointResolver, config: &ClientConfig) -> Result<Url> {
    let base = resolver.resolve().await?;
    Ok(gateway_url(&base, config.version, &config.encoding))
}

#[derive(Debug)]
enum Control {
    Shutdown,
}

/// Owner's handle on a running session
pub struct GatewayHandle {
    control: mpsc::UnboundedSender<Control>,
    stage: watch::Receiver<ConnectionStage>,
    task: JoinHandle<Result<()>>,
}

impl GatewayHandle {
    pub fn stage(&self) -> ConnectionStage {
        *self.stage.borrow()
    }

    /// Wait until the session reaches `stage`.
    pub async fn wait_for_stage(&mut self, stage: ConnectionStage) -> Result<()> {
        self.stage
            .wait_for(|current| *current == stage)
            .await
            .map(|_| ())
            .map_err(|_| GatewayError::Driver(format!("session ended before reaching {}", stage)))
    }

    /// Ask the driver to close the connection and stop.
    pub fn shutdown(&self) {
        let _ = self.control.send(Control::Shutdown);
    }

    /// Wait for the session to end.
    ///
    /// Resolves to `Err(GatewayError::SessionInvalidated)` when the server
    /// rejected the session for good.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| GatewayError::Driver(e.to_string()))?
    }
}

enum Flow {
    Continue,
    Reconnect(ReconnectReason),
    Terminate,
}

enum Exit {
    Reconnect(ReconnectReason),
    Terminated,
    Shutdown,
}

struct SessionDriver {
    config: Arc<ClientConfig>,
    resolver: Arc<dyn EndpointResolver>,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<DispatchRegistry>,
    session: SharedSession,
    control: mpsc::UnboundedReceiver<Control>,
    heartbeat_tx: mpsc::UnboundedSender<HeartbeatEvent>,
    heartbeat_rx: mpsc::UnboundedReceiver<HeartbeatEvent>,
    stage: watch::Sender<ConnectionStage>,
    heartbeat: HeartbeatScheduler,
    generation: u64,
    /// Whether the current connection has accepted a Hello
    hello_seen: bool,
}

impl SessionDriver {
    async fn run(mut self, endpoint: Url) -> Result<()> {
        let mut endpoint = Some(endpoint);

        loop {
            self.set_stage(ConnectionStage::Connecting);

            let attempt = match endpoint.take() {
                Some(url) => Ok(url),
                None => resolve_endpoint(self.resolver.as_ref(), &self.config).await,
            };
            let opened = match attempt {
                Ok(url) => self.connector.open(&url).await,
                Err(e) => Err(e),
            };

            let connection = match opened {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = self.config.reconnect_delay.as_millis() as u64,
                        "Gateway connection attempt failed"
                    );
                    if self.wait_before_retry().await {
                        self.set_stage(ConnectionStage::Disconnected);
                        return Ok(());
                    }
                    continue;
                }
            };

            match self.drive(connection).await {
                Exit::Reconnect(reason) => {
                    metrics::record_reconnect(reason.as_str());
                    tracing::info!(reason = reason.as_str(), "Reconnecting to gateway");
                }
                Exit::Terminated => {
                    self.set_stage(ConnectionStage::Terminated);
                    return Err(GatewayError::SessionInvalidated);
                }
                Exit::Shutdown => {
                    self.set_stage(ConnectionStage::Disconnected);
                    tracing::info!("Gateway session shut down");
                    return Ok(());
                }
            }
        }
    }

    /// Run one connection until it has to be replaced or the session ends.
    async fn drive(&mut self, mut connection: Connection) -> Exit {
        self.generation += 1;
        self.hello_seen = false;
        let generation = self.generation;
        let sender = connection.sender().clone();
        tracing::info!(generation = generation, "Gateway connection open");

        let exit = match self.send_resume(&sender) {
            Ok(resuming) => {
                self.set_stage(if resuming {
                    ConnectionStage::Resuming
                } else {
                    ConnectionStage::AwaitingHello
                });
                self.pump(&mut connection, &sender, generation, resuming)
                    .await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send Resume");
                Exit::Reconnect(ReconnectReason::SendFailed)
            }
        };

        // The timer must be gone before the socket it writes to
        self.heartbeat.stop();
        connection.close();

        if let Exit::Reconnect(_) = exit {
            self.set_stage(ConnectionStage::Reconnecting);
        }
        exit
    }

    async fn pump(
        &mut self,
        connection: &mut Connection,
        sender: &FrameSender,
        generation: u64,
        resuming: bool,
    ) -> Exit {
        loop {
            tokio::select! {
                biased;

                control = self.control.recv() => match control {
                    Some(Control::Shutdown) | None => return Exit::Shutdown,
                },

                Some(event) = self.heartbeat_rx.recv() => match event {
                    HeartbeatEvent::MissedAck { generation: g } if g == generation => {
                        tracing::warn!(generation = generation, "Gateway connection is unresponsive");
                        return Exit::Reconnect(ReconnectReason::MissedAck);
                    }
                    HeartbeatEvent::MissedAck { generation: stale } => {
                        tracing::debug!(generation = stale, "Dropping report from superseded connection");
                    }
                },

                event = connection.next_event() => match event {
                    Some(TransportEvent::Text(text)) => {
                        match self.handle_frame(&text, sender, generation, resuming) {
                            Flow::Continue => {}
                            Flow::Reconnect(reason) => return Exit::Reconnect(reason),
                            Flow::Terminate => return Exit::Terminated,
                        }
                    }
                    Some(TransportEvent::Closed { code, reason }) => {
                        tracing::info!(
                            generation = generation,
                            code = ?code,
                            reason = %reason,
                            "Gateway connection closed"
                        );
                        return Exit::Reconnect(ReconnectReason::TransportClosed);
                    }
                    None => return Exit::Reconnect(ReconnectReason::TransportClosed),
                },
            }
        }
    }

    fn handle_frame(
        &mut self,
        text: &str,
        sender: &FrameSender,
        generation: u64,
        resuming: bool,
    ) -> Flow {
        let packet = match GatewayReceive::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                metrics::record_malformed_frame();
                tracing::warn!(generation = generation, error = %e, "Dropping malformed gateway frame");
                return Flow::Continue;
            }
        };

        // Handlers must observe the sequence of the frame that triggered them
        self.session.lock().observe_sequence(packet.s);
        metrics::record_frame(packet.op);
        tracing::debug!(
            generation = generation,
            op = packet.op,
            seq = ?packet.s,
            event = ?packet.t,
            "Inbound packet"
        );

        let routed = match packet.opcode() {
            Ok(OpCode::Dispatch) => {
                self.handle_dispatch(packet);
                Ok(Flow::Continue)
            }
            Ok(OpCode::Heartbeat) => {
                heartbeat::send_heartbeat(&self.session, sender).map(|_| Flow::Continue)
            }
            Ok(OpCode::Reconnect) => {
                tracing::info!(generation = generation, "Gateway requested a reconnect");
                Ok(Flow::Reconnect(ReconnectReason::ServerRequested))
            }
            Ok(OpCode::InvalidSession) => Ok(self.handle_invalid_session(&packet.d)),
            Ok(OpCode::Hello) => self.handle_hello(&packet.d, sender, generation, resuming),
            Ok(OpCode::HeartbeatAck) => {
                self.session.lock().record_ack(Instant::now());
                Ok(Flow::Continue)
            }
            Ok(op) => {
                tracing::debug!(op = ?op, "Ignoring client-bound opcode from server");
                Ok(Flow::Continue)
            }
            Err(op) => {
                tracing::debug!(op = op, "Unknown opcode");
                Ok(Flow::Continue)
            }
        };

        routed.unwrap_or_else(|e| {
            tracing::warn!(generation = generation, error = %e, "Failed to write to gateway");
            Flow::Reconnect(ReconnectReason::SendFailed)
        })
    }

    fn handle_dispatch(&mut self, packet: GatewayReceive) {
        let Some(event_name) = packet.t.as_deref() else {
            tracing::warn!(seq = ?packet.s, "Dispatch without event name");
            return;
        };

        match event_name {
            "READY" => match ReadyPayload::deserialize(&packet.d) {
                Ok(ready) => {
                    tracing::info!(session_id = %ready.session_id, "Session ready");
                    self.session.lock().set_session_id(ready.session_id);
                    self.set_stage(ConnectionStage::Active);
                }
                Err(e) => tracing::warn!(error = %e, "READY without a session id"),
            },
            "RESUMED" => {
                tracing::info!(seq = ?packet.s, "Session resumed");
                self.set_stage(ConnectionStage::Active);
            }
            _ => {}
        }

        self.dispatcher.publish(event_name, &packet.d);
    }

    fn handle_hello(
        &mut self,
        data: &Value,
        sender: &FrameSender,
        generation: u64,
        resuming: bool,
    ) -> Result<Flow> {
        if self.hello_seen {
            tracing::debug!(generation = generation, "Ignoring repeated Hello");
            return Ok(Flow::Continue);
        }

        let hello = match HelloPayload::deserialize(data) {
            Ok(hello) if hello.heartbeat_interval > 0 => hello,
            Ok(_) => {
                metrics::record_malformed_frame();
                tracing::warn!(generation = generation, "Dropping Hello with a zero heartbeat interval");
                return Ok(Flow::Continue);
            }
            Err(e) => {
                metrics::record_malformed_frame();
                tracing::warn!(error = %e, "Dropping malformed Hello");
                return Ok(Flow::Continue);
            }
        };

        self.heartbeat.start(
            Duration::from_millis(hello.heartbeat_interval),
            generation,
            self.session.clone(),
            sender.clone(),
            self.heartbeat_tx.clone(),
        )?;
        self.hello_seen = true;

        if !resuming {
            self.set_stage(ConnectionStage::Identifying);
            // A fresh identify starts a new session
            self.session.lock().clear_session();
            sender.send(&GatewaySend::identify(&IdentifyPayload {
                token: self.config.token.clone(),
                properties: self.config.properties.clone(),
            })?)?;
            tracing::info!(generation = generation, "Identify sent");
        }

        self.set_stage(ConnectionStage::Active);
        Ok(Flow::Continue)
    }

    fn handle_invalid_session(&mut self, data: &Value) -> Flow {
        if data.as_bool().unwrap_or(false) {
            tracing::warn!("Session invalidated, attempting to resume");
            Flow::Reconnect(ReconnectReason::ResumableInvalidSession)
        } else {
            self.session.lock().clear_session();
            tracing::error!("Session invalidated and cannot be resumed");
            Flow::Terminate
        }
    }

    /// Send Resume if the session can be resumed. Returns whether it was sent.
    fn send_resume(&self, sender: &FrameSender) -> Result<bool> {
        let credentials = self.session.lock().resume_credentials();
        let Some(credentials) = credentials else {
            return Ok(false);
        };

        sender.send(&GatewaySend::resume(&ResumePayload {
            token: self.config.token.clone(),
            session_id: credentials.session_id.clone(),
            seq: credentials.sequence,
        })?)?;
        tracing::info!(
            session_id = %credentials.session_id,
            seq = credentials.sequence,
            "Resume sent"
        );
        Ok(true)
    }

    /// Sleep out the retry delay. Returns true if shutdown was requested.
    async fn wait_before_retry(&mut self) -> bool {
        tokio::select! {
            _ = sleep(self.config.reconnect_delay) => false,
            _ = self.control.recv() => true,
        }
    }

    fn set_stage(&self, stage: ConnectionStage) {
        let previous = self.stage.send_replace(stage);
        if previous != stage {
            metrics::set_stage(stage);
            tracing::debug!(from = %previous, to = %stage, "Gateway stage changed");
        }
    }
}
