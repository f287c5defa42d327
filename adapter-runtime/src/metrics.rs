//! Adapter metrics

use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static::lazy_static! {
    /// Outbound requests by adapter and outcome (HTTP status, or the transport code)
    pub static ref ADAPTER_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "adapter_requests_total",
        "Total adapter requests",
        &["adapter", "status"]
    )
    .unwrap();

    /// Outbound request latency
    pub static ref ADAPTER_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "adapter_request_duration_seconds",
        "Adapter request duration",
        &["adapter"]
    )
    .unwrap();

    /// Lock acquisitions by outcome (acquired, locked, error)
    pub static ref ADAPTER_LOCK_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "adapter_lock_attempts_total",
        "Distributed lock acquisition attempts",
        &["adapter", "outcome"]
    )
    .unwrap();
}
