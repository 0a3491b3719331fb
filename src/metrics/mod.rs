//! Metrics module
//!
//! Prometheus metrics for the tus endpoint, exposed as text at `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    // Request metrics
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "tus_requests_total",
        "Total tus requests",
        &["method", "status"]
    ).unwrap();

    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "tus_request_duration_seconds",
        "Request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    // Upload metrics
    pub static ref UPLOADS_CREATED: Counter = register_counter!(
        "tus_uploads_created_total",
        "Upload resources created"
    ).unwrap();

    pub static ref UPLOADS_COMPLETED: Counter = register_counter!(
        "tus_uploads_completed_total",
        "Upload resources whose offset reached the final length"
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "tus_upload_bytes_total",
        "Total bytes durably written by PATCH requests"
    ).unwrap();

    pub static ref TRANSFERS_ABORTED: CounterVec = register_counter_vec!(
        "tus_transfers_aborted_total",
        "PATCH transfers that stopped before their Content-Length",
        &["reason"]
    ).unwrap();

    pub static ref CHECKSUM_MISMATCHES: Counter = register_counter!(
        "tus_checksum_mismatches_total",
        "PATCH requests whose Upload-Checksum did not match"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "tus_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a finished request
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    REQUESTS_TOTAL
        .with_label_values(&[method, status.as_str()])
        .inc();
    REQUEST_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

/// Record a created upload resource
pub fn record_upload_created() {
    UPLOADS_CREATED.inc();
}

/// Record bytes appended by a PATCH, and whether the upload is now complete
pub fn record_bytes_written(bytes: u64, completed: bool) {
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
    if completed {
        UPLOADS_COMPLETED.inc();
    }
}

/// Record an aborted transfer
pub fn record_transfer_aborted(reason: &str) {
    TRANSFERS_ABORTED.with_label_values(&[reason]).inc();
}

/// Record a checksum mismatch
pub fn record_checksum_mismatch() {
    CHECKSUM_MISMATCHES.inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render the default registry in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
