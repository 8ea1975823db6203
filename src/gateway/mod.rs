//! Gateway Client
//!
//! Session management for the real-time gateway: codec, session state,
//! heartbeats, dispatch routing and the controller tying them together.

pub mod controller;
pub mod dispatch;
pub mod endpoint;
pub mod heartbeat;
pub mod messages;
pub mod session;
pub mod transport;

pub use controller::{
    ClientConfig, ConnectionStage, GatewayClient, GatewayHandle, ReconnectReason,
};
pub use dispatch::{DispatchHandler, DispatchRegistry};
pub use endpoint::{gateway_url, EndpointResolver, StaticEndpoint};
pub use heartbeat::{HeartbeatEvent, HeartbeatScheduler};
pub use messages::{GatewayReceive, GatewaySend, OpCode};
pub use session::{ResumeCredentials, SessionState, SharedSession};
pub use transport::{
    Connection, Connector, FrameSender, OutboundFrame, TransportEvent, WebSocketConnector,
};
