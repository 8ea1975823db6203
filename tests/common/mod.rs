//! Common Test Utilities
//!
//! An in-process fake gateway: every connection the client opens shows up
//! as a [`ServerSide`] the test can push frames into and read frames from.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use gateway_relay::gateway::{
    ClientConfig, Connection, Connector, FrameSender, GatewayClient, OutboundFrame,
    StaticEndpoint, TransportEvent,
};
use gateway_relay::gateway::messages::IdentifyProperties;
use gateway_relay::shared::{GatewayError, Result};

pub const TEST_TOKEN: &str = "test-token";
pub const RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// The server end of one fake connection
pub struct ServerSide {
    pub url: Url,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl ServerSide {
    /// Deliver a frame to the client.
    pub fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.inbound.send(TransportEvent::Text(text.to_string()));
    }

    /// Drop the connection from the server side.
    pub fn close(&self, code: u16) {
        let _ = self.inbound.send(TransportEvent::Closed {
            code: Some(code),
            reason: String::new(),
        });
    }

    /// Next text frame the client sent, parsed as JSON.
    pub async fn expect_frame(&mut self) -> Value {
        match self.outbound.recv().await {
            Some(OutboundFrame::Text(text)) => {
                serde_json::from_str(&text).expect("client sent invalid JSON")
            }
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    /// Next frame must be the client closing the socket.
    pub async fn expect_close(&mut self) {
        match self.outbound.recv().await {
            Some(OutboundFrame::Close) => {}
            other => panic!("expected the connection to close, got {:?}", other),
        }
    }

    /// A frame the client already sent, if any.
    pub fn try_frame(&mut self) -> Option<OutboundFrame> {
        self.outbound.try_recv().ok()
    }

    /// Push Hello and consume the immediate heartbeat. Returns the heartbeat.
    pub async fn hello(&mut self, interval_ms: u64) -> Value {
        self.push(hello(interval_ms));
        let beat = self.expect_frame().await;
        assert_eq!(beat["op"], 1);
        beat
    }

    /// Push Hello, consume the heartbeat and the Identify that follows it.
    pub async fn hello_and_identify(&mut self, interval_ms: u64) -> Value {
        self.hello(interval_ms).await;
        let identify = self.expect_frame().await;
        assert_eq!(identify["op"], 2);
        identify
    }
}

/// Connector that hands each opened connection to the test
pub struct FakeConnector {
    servers: mpsc::UnboundedSender<ServerSide>,
    failures: AtomicUsize,
}

impl FakeConnector {
    /// The first `failures` attempts fail before any socket is opened.
    pub fn failing(failures: usize) -> (Self, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            servers,
            failures: AtomicUsize::new(failures),
        };
        (connector, rx)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, url: &Url) -> Result<Connection> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::TransportClosed);
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.servers
            .send(ServerSide {
                url: url.clone(),
                outbound: out_rx,
                inbound: in_tx,
            })
            .map_err(|_| GatewayError::TransportClosed)?;

        Ok(Connection::new(FrameSender::new(out_tx), in_rx))
    }
}

/// A client wired to the fake gateway
pub struct TestGateway {
    pub client: GatewayClient,
    servers: mpsc::UnboundedReceiver<ServerSide>,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_failures(0)
    }

    pub fn with_failures(failures: usize) -> Self {
        let (connector, servers) = FakeConnector::failing(failures);
        let endpoint = StaticEndpoint(Url::parse("wss://gateway.test").unwrap());
        let client = GatewayClient::new(test_config(), Arc::new(endpoint), Arc::new(connector));
        Self { client, servers }
    }

    /// Wait for the client to open its next connection.
    pub async fn next_server(&mut self) -> ServerSide {
        self.servers
            .recv()
            .await
            .expect("connector dropped")
    }

    /// True if the client opened a connection the test has not picked up.
    pub fn has_pending_server(&mut self) -> bool {
        match self.servers.try_recv() {
            Ok(_) => true,
            Err(_) => false,
        }
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        token: TEST_TOKEN.to_string(),
        version: 6,
        encoding: "json".to_string(),
        properties: IdentifyProperties {
            os: "linux".to_string(),
            browser: "gateway-relay".to_string(),
            device: "gateway-relay".to_string(),
        },
        reconnect_delay: RECONNECT_DELAY,
    }
}

pub fn hello(interval_ms: u64) -> Value {
    json!({"op": 10, "d": {"heartbeat_interval": interval_ms}})
}

pub fn ack() -> Value {
    json!({"op": 11})
}

pub fn dispatch(event: &str, seq: u64, data: Value) -> Value {
    json!({"op": 0, "t": event, "s": seq, "d": data})
}

pub fn ready(seq: u64, session_id: &str) -> Value {
    dispatch("READY", seq, json!({"session_id": session_id, "v": 6}))
}

/// Collects dispatch events delivered to a subscriber
pub fn event_channel() -> (
    mpsc::UnboundedSender<(String, Value)>,
    mpsc::UnboundedReceiver<(String, Value)>,
) {
    mpsc::unbounded_channel()
}
