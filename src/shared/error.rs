//! Gateway Error Types
//!
//! Centralized error handling for the gateway client and its collaborators.

/// Gateway client error type
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Endpoint resolution failed: {0}")]
    Resolve(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Transport closed")]
    TransportClosed,

    /// The server rejected the session and it cannot be resumed.
    #[error("Session invalidated by the gateway and cannot be resumed")]
    SessionInvalidated,

    #[error("A gateway session is already in flight")]
    AlreadyConnected,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Session driver failed: {0}")]
    Driver(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        GatewayError::WebSocket(Box::new(e))
    }
}

impl GatewayError {
    /// Whether this error ends the session for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GatewayError::SessionInvalidated)
    }
}

/// Result alias used across the crate
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
