//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define daemon metrics (messages, events, reloads, reconnects)
//! - Expose a Prometheus-compatible metrics endpoint when enabled
//!
//! # Metrics
//! - `routing_messages_total` (counter): bus messages by outcome
//!   (`acked`, `nacked`, `dropped`)
//! - `routing_events_total` (counter): decoded events by action
//! - `routing_reloads_total` (counter): load balancer reloads and restarts
//! - `routing_promotions_total` (counter): staging roots promoted
//! - `routing_reconnects_total` (counter): broker reconnect attempts
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op
//! - Labels are small fixed sets

use std::net::SocketAddr;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Count one processed bus message.
pub fn record_message(outcome: &'static str) {
    metrics::counter!("routing_messages_total", "outcome" => outcome).increment(1);
}

/// Count one decoded event.
pub fn record_event(action: &'static str) {
    metrics::counter!("routing_events_total", "action" => action).increment(1);
}

/// Count one load balancer reload or restart.
pub fn record_reload() {
    metrics::counter!("routing_reloads_total").increment(1);
}

/// Count one promoted staging root.
pub fn record_promotion() {
    metrics::counter!("routing_promotions_total").increment(1);
}

/// Count one broker reconnect attempt.
pub fn record_reconnect() {
    metrics::counter!("routing_reconnects_total").increment(1);
}
