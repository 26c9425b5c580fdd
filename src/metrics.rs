//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade for:
//! - Events received, accepted and deduplicated per channel
//! - Malformed frames and transport errors
//! - Pull request latency
//! - Cursor persistence and position
//! - Connection state and buffer occupancy
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `delivery_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)
//!
//! Nothing is recorded unless the embedding application installs a recorder.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a raw event handed to the engine by a channel.
pub fn record_event_received(channel: &'static str) {
    counter!("delivery_events_received_total", "channel" => channel).increment(1);
}

/// Record an event accepted and forwarded to the consumer.
pub fn record_event_accepted(channel: &'static str) {
    counter!("delivery_events_accepted_total", "channel" => channel).increment(1);
}

/// Record a duplicate event absorbed by the buffer.
pub fn record_event_deduplicated(channel: &'static str) {
    counter!("delivery_events_deduplicated_total", "channel" => channel).increment(1);
}

/// Record an event delivered after the channel was closed (dropped).
pub fn record_event_stale(channel: &'static str) {
    counter!("delivery_events_stale_total", "channel" => channel).increment(1);
}

/// Record a frame that could not be decoded.
pub fn record_malformed_frame(channel: &'static str) {
    counter!("delivery_malformed_frames_total", "channel" => channel).increment(1);
}

/// Record a transport error (failed tick, dropped stream, failed open).
pub fn record_transport_error(channel: &'static str) {
    counter!("delivery_transport_errors_total", "channel" => channel).increment(1);
}

/// Record one pull request round-trip.
pub fn record_pull_request(duration: Duration, events: usize) {
    histogram!("delivery_pull_request_duration_seconds").record(duration.as_secs_f64());
    counter!("delivery_pull_events_fetched_total").increment(events as u64);
}

/// Record a cursor persistence attempt.
pub fn record_cursor_persist(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("delivery_cursor_persists_total", "status" => status).increment(1);
}

/// Record a cursor SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn record_cursor_retry(operation: &str) {
    counter!("delivery_cursor_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Gauge for the current cursor position.
pub fn set_cursor_value(seq: u64) {
    gauge!("delivery_cursor_seq").set(seq as f64);
}

/// Gauge for buffered event count.
pub fn set_buffer_len(len: usize) {
    gauge!("delivery_buffer_events").set(len as f64);
}

/// Record a consumer-issued reset.
pub fn record_reset() {
    counter!("delivery_resets_total").increment(1);
}

/// Gauge for connection state.
pub fn set_connection_state(state: &str) {
    let value = match state {
        "Disconnected" => 0.0,
        "Connecting" => 1.0,
        "Connected" => 2.0,
        _ => -1.0,
    };
    gauge!("delivery_connection_state").set(value);
}
