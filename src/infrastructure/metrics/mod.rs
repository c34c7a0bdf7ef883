//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Throughput**: messages received, processed, and batch inserts
//! - **Errors**: counts by error kind
//! - **Latency**: batch flush wall time
//! - **Fan-out**: active downstream connections, upstream reconnects
//!
//! Metrics are exposed at `/metrics` on the operational HTTP port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_relay_messages_received_total",
        "Total validated messages received from the upstream feed"
    );
    describe_counter!(
        "market_relay_messages_processed_total",
        "Total messages flushed through the sink pipeline"
    );
    describe_counter!(
        "market_relay_batch_inserts_total",
        "Total batch flushes"
    );
    describe_counter!(
        "market_relay_errors_total",
        "Total errors by kind"
    );
    describe_counter!(
        "market_relay_reconnects_total",
        "Total upstream reconnection attempts"
    );
    describe_gauge!(
        "market_relay_fanout_connections",
        "Active downstream WebSocket connections"
    );
    describe_histogram!(
        "market_relay_processing_latency_seconds",
        "Wall time of a batch flush across both sinks"
    );
}

// =============================================================================
// Error Kinds
// =============================================================================

/// Stable error-kind labels for logs and the error counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration load failure.
    ConfigLoad,
    /// Database connect failure.
    DbConnect,
    /// Cache connect failure.
    CacheConnect,
    /// Upstream WebSocket connect failure.
    WsConnect,
    /// Relational store insert failure.
    StoreInsert,
    /// Cache insert failure.
    CacheInsert,
    /// Serialization failure.
    Marshal,
    /// Deserialization failure.
    Unmarshal,
    /// Inbound record validation failure.
    Validation,
    /// Downstream authentication failure.
    Auth,
}

impl ErrorKind {
    /// Get the counter label for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigLoad => "config_load",
            Self::DbConnect => "db_connect",
            Self::CacheConnect => "cache_connect",
            Self::WsConnect => "ws_connect",
            Self::StoreInsert => "store_insert",
            Self::CacheInsert => "cache_insert",
            Self::Marshal => "marshal",
            Self::Unmarshal => "unmarshal",
            Self::Validation => "validation",
            Self::Auth => "auth",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a validated message received from the upstream feed.
pub fn record_message_received() {
    counter!("market_relay_messages_received_total").increment(1);
}

/// Record messages flushed through the pipeline.
pub fn record_messages_processed(count: u64) {
    counter!("market_relay_messages_processed_total").increment(count);
}

/// Record a completed batch flush.
pub fn record_batch_insert() {
    counter!("market_relay_batch_inserts_total").increment(1);
}

/// Record an error by kind.
pub fn record_error(kind: ErrorKind) {
    counter!("market_relay_errors_total", "type" => kind.as_str()).increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("market_relay_reconnects_total").increment(1);
}

/// Record a downstream connection being opened.
pub fn record_connection_opened() {
    gauge!("market_relay_fanout_connections").increment(1.0);
}

/// Record a downstream connection being closed.
pub fn record_connection_closed() {
    gauge!("market_relay_fanout_connections").decrement(1.0);
}

/// Record the wall time of a batch flush.
pub fn record_processing_latency(duration: Duration) {
    histogram!("market_relay_processing_latency_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
