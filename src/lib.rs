//! # Gateway Relay Library
//!
//! This crate provides a persistent client for a Discord-compatible
//! real-time gateway with:
//! - Identify/Resume handshake selection
//! - Heartbeat liveness with missed-ack detection
//! - Transparent reconnection and invalid-session recovery
//! - Dispatch event fan-out to registered subscribers
//! - A Redis writer for guild member and presence records
//!
//! ## Module Structure
//!
//! ```text
//! gateway_relay/
//! +-- config/         Configuration management
//! +-- gateway/        Protocol core (codec, session, heartbeat, dispatch, controller)
//! +-- infrastructure/ Endpoint resolver, Redis cache writer, metrics
//! +-- shared/         Common utilities (errors)
//! ```

// Configuration module
pub mod config;

// Gateway protocol core
pub mod gateway;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Shared utilities
pub mod shared;

// Application startup
pub mod startup;

// Telemetry and observability
pub mod telemetry;
