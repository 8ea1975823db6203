//! HTTP Clients
//!
//! REST calls made outside the gateway socket.

mod gateway_resolver;

pub use gateway_resolver::{GatewayBotResponse, HttpEndpointResolver};
