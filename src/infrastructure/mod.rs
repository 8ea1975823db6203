//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - Gateway endpoint resolution (HTTP)
//! - Guild cache writer (Redis)
//! - Prometheus metrics

pub mod cache;
pub mod http;
pub mod metrics;
