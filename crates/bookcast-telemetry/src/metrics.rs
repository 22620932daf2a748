//! Prometheus metrics for bookcast.
//!
//! Covers:
//! - Upstream feed health (connection, reconnects, frames, errors)
//! - Replication (snapshots, deltas, dropped deltas, update rate)
//! - Fan-out (active books, subscribers, evictions, client sessions)
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration
//! failure means duplicate metric names, a startup bug that must crash
//! immediately. These panics only occur during static initialization.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge,
    register_int_gauge_vec, CounterVec, Encoder, GaugeVec, HistogramVec, IntGauge, IntGaugeVec,
    TextEncoder,
};

/// Upstream feed connection state per symbol (1 = connected).
pub static FEED_CONNECTED: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "bookcast_feed_connected",
        "Upstream feed connection state (1=connected)",
        &["symbol"]
    )
    .unwrap()
});

/// Upstream sessions that ended and were re-established.
pub static FEED_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookcast_feed_reconnect_total",
        "Total upstream feed session losses",
        &["symbol"]
    )
    .unwrap()
});

/// Raw frames received from the venue.
pub static FEED_FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookcast_feed_frames_total",
        "Total upstream frames received",
        &["symbol"]
    )
    .unwrap()
});

/// Frames that failed normalization.
pub static FEED_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookcast_feed_errors_total",
        "Total upstream frames rejected by the normalizer",
        &["symbol", "kind"]
    )
    .unwrap()
});

/// Frame handling time in microseconds (normalize + apply + fan-out).
pub static FRAME_PROCESSING_US: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bookcast_frame_processing_us",
        "Frame handling time in microseconds",
        &["symbol"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Snapshots applied to replicas.
pub static SNAPSHOTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookcast_snapshots_total",
        "Total book snapshots applied",
        &["symbol"]
    )
    .unwrap()
});

/// Deltas applied to replicas.
pub static DELTAS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookcast_deltas_total",
        "Total book deltas applied",
        &["symbol"]
    )
    .unwrap()
});

/// Deltas discarded because they arrived before the first snapshot.
pub static DROPPED_DELTAS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookcast_dropped_deltas_total",
        "Total deltas dropped before the first snapshot",
        &["symbol"]
    )
    .unwrap()
});

/// Last reported delta rate per minute.
pub static UPDATE_RATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "bookcast_update_rate_per_minute",
        "Delta arrival rate extrapolated to one minute",
        &["symbol"]
    )
    .unwrap()
});

/// Symbols with a live replica.
pub static ACTIVE_BOOKS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("bookcast_active_books", "Symbols with a live replica").unwrap()
});

/// Subscribers per symbol.
pub static SUBSCRIBERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "bookcast_subscribers",
        "Current subscribers per symbol",
        &["symbol"]
    )
    .unwrap()
});

/// Subscribers removed by the worker.
/// Labels: reason (overflow/closed)
pub static EVICTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookcast_evictions_total",
        "Total subscribers evicted",
        &["symbol", "reason"]
    )
    .unwrap()
});

/// Connected downstream socket clients.
pub static CLIENT_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "bookcast_client_sessions",
        "Connected downstream socket clients"
    )
    .unwrap()
});

/// Render all registered metrics in the Prometheus text format.
pub fn gather_text() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
}

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record feed session open/close.
    pub fn feed_connected(symbol: &str, connected: bool) {
        FEED_CONNECTED
            .with_label_values(&[symbol])
            .set(if connected { 1.0 } else { 0.0 });
    }

    /// Record a lost upstream session.
    pub fn feed_reconnect(symbol: &str) {
        FEED_RECONNECT_TOTAL.with_label_values(&[symbol]).inc();
    }

    pub fn frame_received(symbol: &str) {
        FEED_FRAMES_TOTAL.with_label_values(&[symbol]).inc();
    }

    /// Record a normalization failure by kind.
    pub fn feed_error(symbol: &str, kind: &str) {
        FEED_ERRORS_TOTAL.with_label_values(&[symbol, kind]).inc();
    }

    pub fn frame_processed(symbol: &str, elapsed_us: f64) {
        FRAME_PROCESSING_US
            .with_label_values(&[symbol])
            .observe(elapsed_us);
    }

    pub fn snapshot_applied(symbol: &str) {
        SNAPSHOTS_TOTAL.with_label_values(&[symbol]).inc();
    }

    pub fn delta_applied(symbol: &str) {
        DELTAS_TOTAL.with_label_values(&[symbol]).inc();
    }

    pub fn delta_dropped(symbol: &str) {
        DROPPED_DELTAS_TOTAL.with_label_values(&[symbol]).inc();
    }

    pub fn update_rate(symbol: &str, rate_per_minute: f64) {
        UPDATE_RATE
            .with_label_values(&[symbol])
            .set(rate_per_minute);
    }

    pub fn active_books(count: usize) {
        ACTIVE_BOOKS.set(count as i64);
    }

    pub fn subscribers(symbol: &str, count: usize) {
        SUBSCRIBERS.with_label_values(&[symbol]).set(count as i64);
    }

    /// Record a subscriber eviction.
    pub fn subscriber_evicted(symbol: &str, reason: &str) {
        EVICTIONS_TOTAL.with_label_values(&[symbol, reason]).inc();
    }

    pub fn client_connected() {
        CLIENT_SESSIONS.inc();
    }

    pub fn client_disconnected() {
        CLIENT_SESSIONS.dec();
    }
}
