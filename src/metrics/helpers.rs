//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    FEED_RECORDS, FEED_UNREAD, HISTORY_LOADS_TOTAL, HISTORY_LOAD_LATENCY, LIVE_EVENTS_TOTAL,
    MARK_READ_TOTAL, RELAY_LAGGED_TOTAL, TRANSPORT_CONNECTED, TRANSPORT_EVENTS_TOTAL,
    TRANSPORT_RECONNECTS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording transport metrics
pub struct TransportMetrics;

impl TransportMetrics {
    pub fn set_connected(connected: bool) {
        TRANSPORT_CONNECTED.set(if connected { 1 } else { 0 });
    }

    pub fn record_reconnect() {
        TRANSPORT_RECONNECTS_TOTAL.inc();
    }

    pub fn record_event(event: &str) {
        TRANSPORT_EVENTS_TOTAL.with_label_values(&[event]).inc();
    }
}

/// Helper struct for recording relay metrics
pub struct RelayMetrics;

impl RelayMetrics {
    pub fn record_lagged(skipped: u64) {
        RELAY_LAGGED_TOTAL.inc_by(skipped);
    }
}

/// Helper struct for recording feed metrics
pub struct FeedMetrics;

impl FeedMetrics {
    /// `outcome`: accepted, duplicate, rejected
    pub fn record_live_event(outcome: &str) {
        LIVE_EVENTS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// `result`: ok, error, stale
    pub fn record_history_load(result: &str) {
        HISTORY_LOADS_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn observe_history_latency(elapsed: Duration) {
        HISTORY_LOAD_LATENCY.observe(elapsed.as_secs_f64());
    }

    pub fn record_mark_read(result: &str) {
        MARK_READ_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn set_list_size(records: usize, unread: usize) {
        FEED_RECORDS.set(records as i64);
        FEED_UNREAD.set(unread as i64);
    }
}
