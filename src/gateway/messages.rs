//! Gateway Message Types
//!
//! Discord-compatible gateway envelopes and the payloads this client
//! exchanges. Inbound frames are decoded into [`GatewayReceive`],
//! outbound ones are built as [`GatewaySend`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::error::Result;

/// Gateway opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Event dispatch
    Dispatch = 0,
    /// Heartbeat (either direction)
    Heartbeat = 1,
    /// Identify
    Identify = 2,
    /// Resume
    Resume = 6,
    /// Reconnect
    Reconnect = 7,
    /// Invalid session
    InvalidSession = 9,
    /// Hello
    Hello = 10,
    /// Heartbeat ACK
    HeartbeatAck = 11,
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(op: u8) -> Result<Self, Self::Error> {
        match op {
            0 => Ok(OpCode::Dispatch),
            1 => Ok(OpCode::Heartbeat),
            2 => Ok(OpCode::Identify),
            6 => Ok(OpCode::Resume),
            7 => Ok(OpCode::Reconnect),
            9 => Ok(OpCode::InvalidSession),
            10 => Ok(OpCode::Hello),
            11 => Ok(OpCode::HeartbeatAck),
            other => Err(other),
        }
    }
}

/// Incoming gateway message
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayReceive {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayReceive {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Known opcode, or the raw value when unrecognised.
    pub fn opcode(&self) -> Result<OpCode, u8> {
        OpCode::try_from(self.op)
    }
}

/// Outgoing gateway message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewaySend {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewaySend {
    fn new(op: OpCode, d: Value) -> Self {
        Self {
            op: op as u8,
            d: Some(d),
        }
    }

    /// Heartbeat carrying the last seen sequence, `null` when none.
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::new(
            OpCode::Heartbeat,
            last_sequence.map(Value::from).unwrap_or(Value::Null),
        )
    }

    pub fn identify(payload: &IdentifyPayload) -> Result<Self> {
        Ok(Self::new(OpCode::Identify, serde_json::to_value(payload)?))
    }

    pub fn resume(payload: &ResumePayload) -> Result<Self> {
        Ok(Self::new(OpCode::Resume, serde_json::to_value(payload)?))
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Hello payload (op 10)
#[derive(Debug, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

/// Ready payload (dispatch READY), only the fields the session needs
#[derive(Debug, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
}

/// Identify payload (op 2)
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub properties: IdentifyProperties,
}

/// Identify connection properties
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

/// Resume payload (op 6)
#[derive(Debug, Clone, Serialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}
