//! Prometheus metrics for feed health and latency.
//!
//! This module provides metrics for:
//! - Hub frame processing latency
//! - Snapshot fetch latency and failures
//! - Reconnects, protocol errors and sequence gaps
//! - Slow-consumer drops and active subscriptions

use std::time::Instant;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use tracing::debug;

// === Metric Name Constants ===

/// Hub frames received counter metric name.
pub const METRIC_FRAMES_RECEIVED: &str = "feed_frames_received_total";
/// Frame processing latency metric name.
pub const METRIC_FRAME_LATENCY: &str = "feed_frame_latency_ms";
/// Snapshot fetch latency metric name.
pub const METRIC_SNAPSHOT_LATENCY: &str = "feed_snapshot_latency_ms";
/// Snapshot failures counter metric name.
pub const METRIC_SNAPSHOT_FAILURES: &str = "feed_snapshot_failures_total";
/// Reconnects counter metric name.
pub const METRIC_RECONNECTS: &str = "feed_reconnects_total";
/// Protocol errors counter metric name.
pub const METRIC_PROTOCOL_ERRORS: &str = "feed_protocol_errors_total";
/// Sequence gaps counter metric name.
pub const METRIC_SEQUENCE_GAPS: &str = "feed_sequence_gaps_total";
/// Stale deltas counter metric name.
pub const METRIC_STALE_DELTAS: &str = "feed_stale_deltas_total";
/// Updates dropped for slow consumers metric name.
pub const METRIC_SLOW_CONSUMER_DROPS: &str = "feed_slow_consumer_drops_total";
/// Active subscription handles gauge metric name.
pub const METRIC_ACTIVE_SUBSCRIPTIONS: &str = "feed_active_subscriptions";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    // Latency histograms
    describe_histogram!(
        METRIC_FRAME_LATENCY,
        "Hub frame processing latency in milliseconds"
    );
    describe_histogram!(
        METRIC_SNAPSHOT_LATENCY,
        "Snapshot fetch latency in milliseconds"
    );

    // Counters
    describe_counter!(METRIC_FRAMES_RECEIVED, "Total number of hub frames received");
    describe_counter!(METRIC_SNAPSHOT_FAILURES, "Total number of failed snapshot fetches");
    describe_counter!(METRIC_RECONNECTS, "Total number of reconnect attempts");
    describe_counter!(METRIC_PROTOCOL_ERRORS, "Total number of undecodable frames");
    describe_counter!(METRIC_SEQUENCE_GAPS, "Total number of nonce gaps detected");
    describe_counter!(METRIC_STALE_DELTAS, "Total number of stale deltas discarded");
    describe_counter!(
        METRIC_SLOW_CONSUMER_DROPS,
        "Total number of updates dropped because a subscriber fell behind"
    );

    describe_gauge!(METRIC_ACTIVE_SUBSCRIPTIONS, "Number of live subscription handles");

    debug!("Metrics initialized");
}

/// Record snapshot fetch latency.
pub fn record_snapshot_latency(start: Instant, channel: &str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_SNAPSHOT_LATENCY, "channel" => channel.to_string()).record(latency_ms);
}

/// Increment frames received counter.
pub fn inc_frames_received() {
    counter!(METRIC_FRAMES_RECEIVED).increment(1);
}

/// Increment snapshot failures counter.
pub fn inc_snapshot_failures(channel: &str) {
    counter!(METRIC_SNAPSHOT_FAILURES, "channel" => channel.to_string()).increment(1);
}

/// Increment reconnects counter.
pub fn inc_reconnects() {
    counter!(METRIC_RECONNECTS).increment(1);
}

/// Increment protocol errors counter.
pub fn inc_protocol_errors() {
    counter!(METRIC_PROTOCOL_ERRORS).increment(1);
}

/// Increment sequence gaps counter.
pub fn inc_sequence_gaps(channel: &str) {
    counter!(METRIC_SEQUENCE_GAPS, "channel" => channel.to_string()).increment(1);
}

/// Increment stale deltas counter.
pub fn inc_stale_deltas() {
    counter!(METRIC_STALE_DELTAS).increment(1);
}

/// Increment slow-consumer drops counter.
pub fn inc_slow_consumer_drops() {
    counter!(METRIC_SLOW_CONSUMER_DROPS).increment(1);
}

/// Set the active subscriptions gauge.
pub fn set_active_subscriptions(count: usize) {
    gauge!(METRIC_ACTIVE_SUBSCRIPTIONS).set(count as f64);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.metric_name).record(latency_ms);
    }
}

/// Create a latency timer for hub frame processing.
pub fn timer_frame() -> LatencyTimer {
    LatencyTimer::new(METRIC_FRAME_LATENCY)
}
