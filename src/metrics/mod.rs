//! Prometheus metrics for the notification client.
//!
//! - Transport metrics (connection status, reconnects, inbound events)
//! - Relay metrics (events skipped by lagging subscribers)
//! - Feed metrics (live event outcomes, history loads, mark-read results, list size)

mod helpers;

pub use helpers::{encode_metrics, FeedMetrics, RelayMetrics, TransportMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara_client";

lazy_static! {
    // ============================================================================
    // Transport Metrics
    // ============================================================================

    /// Socket connection status (1 = connected, 0 = disconnected)
    pub static ref TRANSPORT_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_transport_connected", METRIC_PREFIX),
        "Socket connection status (1=connected, 0=disconnected)"
    ).unwrap();

    /// Reconnection attempts after a lost or failed connection
    pub static ref TRANSPORT_RECONNECTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_transport_reconnects_total", METRIC_PREFIX),
        "Total socket reconnection attempts"
    ).unwrap();

    /// Inbound socket events by name
    pub static ref TRANSPORT_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_transport_events_total", METRIC_PREFIX),
        "Total inbound socket events",
        &["event"]
    ).unwrap();

    // ============================================================================
    // Relay Metrics
    // ============================================================================

    /// Events a subscriber skipped because it fell behind
    pub static ref RELAY_LAGGED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_relay_lagged_total", METRIC_PREFIX),
        "Total live events skipped by lagging relay subscribers"
    ).unwrap();

    // ============================================================================
    // Feed Metrics
    // ============================================================================

    /// Live events by outcome (accepted, duplicate, rejected)
    pub static ref LIVE_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_live_events_total", METRIC_PREFIX),
        "Total live notification events by outcome",
        &["outcome"]
    ).unwrap();

    /// History loads by result (ok, error, stale)
    pub static ref HISTORY_LOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_history_loads_total", METRIC_PREFIX),
        "Total history loads by result",
        &["result"]
    ).unwrap();

    /// History load latency
    pub static ref HISTORY_LOAD_LATENCY: Histogram = register_histogram!(
        format!("{}_history_load_latency_seconds", METRIC_PREFIX),
        "History load latency in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Mark-read requests by result
    pub static ref MARK_READ_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_mark_read_total", METRIC_PREFIX),
        "Total mark-read calls by result",
        &["result"]
    ).unwrap();

    /// Records in the working list
    pub static ref FEED_RECORDS: IntGauge = register_int_gauge!(
        format!("{}_feed_records", METRIC_PREFIX),
        "Number of records in the notification list"
    ).unwrap();

    /// Unread records in the working list
    pub static ref FEED_UNREAD: IntGauge = register_int_gauge!(
        format!("{}_feed_unread", METRIC_PREFIX),
        "Number of unread records in the notification list"
    ).unwrap();
}
