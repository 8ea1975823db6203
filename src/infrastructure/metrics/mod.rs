//! Prometheus Metrics Module
//!
//! Provides gateway metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Inbound frames by opcode, and malformed frames
//! - Heartbeats sent
//! - Reconnects by reason
//! - Dispatch subscriber failures by event
//! - Current session stage

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::gateway::ConnectionStage;

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Inbound frame counter by opcode
pub static GATEWAY_FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_frames_total", "Inbound gateway frames by opcode")
            .namespace("gateway_relay"),
        &["op"],
    )
    .expect("Failed to create GATEWAY_FRAMES_TOTAL metric")
});

/// Frames that could not be decoded
pub static GATEWAY_MALFORMED_FRAMES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "gateway_malformed_frames_total",
            "Inbound frames dropped because they failed to decode",
        )
        .namespace("gateway_relay"),
    )
    .expect("Failed to create GATEWAY_MALFORMED_FRAMES_TOTAL metric")
});

/// Heartbeats written to the gateway
pub static GATEWAY_HEARTBEATS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("gateway_heartbeats_total", "Heartbeats sent to the gateway")
            .namespace("gateway_relay"),
    )
    .expect("Failed to create GATEWAY_HEARTBEATS_TOTAL metric")
});

/// Reconnects by reason
pub static GATEWAY_RECONNECTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_reconnects_total", "Gateway reconnects by reason")
            .namespace("gateway_relay"),
        &["reason"],
    )
    .expect("Failed to create GATEWAY_RECONNECTS_TOTAL metric")
});

/// Dispatch subscriber failures by event name
pub static DISPATCH_SUBSCRIBER_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "dispatch_subscriber_failures_total",
            "Dispatch subscribers that returned an error or panicked",
        )
        .namespace("gateway_relay"),
        &["event"],
    )
    .expect("Failed to create DISPATCH_SUBSCRIBER_FAILURES_TOTAL metric")
});

/// Current session stage (1 for the active stage, 0 otherwise)
pub static GATEWAY_STAGE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("gateway_stage", "Current gateway session stage").namespace("gateway_relay"),
        &["stage"],
    )
    .expect("Failed to create GATEWAY_STAGE metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(GATEWAY_FRAMES_TOTAL.clone()))
        .expect("Failed to register GATEWAY_FRAMES_TOTAL");
    registry
        .register(Box::new(GATEWAY_MALFORMED_FRAMES_TOTAL.clone()))
        .expect("Failed to register GATEWAY_MALFORMED_FRAMES_TOTAL");
    registry
        .register(Box::new(GATEWAY_HEARTBEATS_TOTAL.clone()))
        .expect("Failed to register GATEWAY_HEARTBEATS_TOTAL");
    registry
        .register(Box::new(GATEWAY_RECONNECTS_TOTAL.clone()))
        .expect("Failed to register GATEWAY_RECONNECTS_TOTAL");
    registry
        .register(Box::new(DISPATCH_SUBSCRIBER_FAILURES_TOTAL.clone()))
        .expect("Failed to register DISPATCH_SUBSCRIBER_FAILURES_TOTAL");
    registry
        .register(Box::new(GATEWAY_STAGE.clone()))
        .expect("Failed to register GATEWAY_STAGE");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_frame(op: u8) {
    GATEWAY_FRAMES_TOTAL
        .with_label_values(&[op.to_string().as_str()])
        .inc();
}

pub fn record_malformed_frame() {
    GATEWAY_MALFORMED_FRAMES_TOTAL.inc();
}

pub fn record_heartbeat_sent() {
    GATEWAY_HEARTBEATS_TOTAL.inc();
}

pub fn record_reconnect(reason: &str) {
    GATEWAY_RECONNECTS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_subscriber_failure(event: &str) {
    DISPATCH_SUBSCRIBER_FAILURES_TOTAL
        .with_label_values(&[event])
        .inc();
}

/// Helper to flag the current session stage
pub fn set_stage(current: ConnectionStage) {
    for stage in ConnectionStage::ALL {
        GATEWAY_STAGE
            .with_label_values(&[stage.as_str()])
            .set(i64::from(stage == current));
    }
}
