//! Prometheus metrics for the streaming gateway.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};

lazy_static! {
    /// Streams currently in flight across all workers.
    pub static ref ACTIVE_STREAMS: Gauge = register_gauge!(
        "streamgate_active_streams",
        "Number of in-flight download streams"
    )
    .unwrap();

    /// Streams dispatched, by worker index.
    pub static ref STREAMS_TOTAL: CounterVec = register_counter_vec!(
        "streamgate_streams_total",
        "Total number of download streams dispatched",
        &["worker"]
    )
    .unwrap();

    /// Bytes emitted to HTTP clients.
    pub static ref STREAMED_BYTES_TOTAL: Counter = register_counter!(
        "streamgate_streamed_bytes_total",
        "Total bytes emitted to download clients"
    )
    .unwrap();

    /// HTTP responses on the download route, by status code.
    pub static ref DOWNLOAD_RESPONSES_TOTAL: CounterVec = register_counter_vec!(
        "streamgate_download_responses_total",
        "Total download responses by status code",
        &["status"]
    )
    .unwrap();
}

pub fn record_stream_started(worker: usize) {
    ACTIVE_STREAMS.inc();
    STREAMS_TOTAL
        .with_label_values(&[&worker.to_string()])
        .inc();
}

pub fn record_stream_finished() {
    ACTIVE_STREAMS.dec();
}

pub fn record_streamed_bytes(count: u64) {
    STREAMED_BYTES_TOTAL.inc_by(count as f64);
}

pub fn record_download_response(status: u16) {
    DOWNLOAD_RESPONSES_TOTAL
        .with_label_values(&[&status.to_string()])
        .inc();
}

/// Render the registry in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
