// Prometheus metrics for the runner API

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use runner_common::types::OutcomeKind;

lazy_static! {
    pub static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "runner_executions_total",
        "Executions that produced a result, by outcome",
        &["outcome"]
    )
    .expect("metric can be registered");
    pub static ref REJECTIONS_TOTAL: IntCounter = register_int_counter!(
        "runner_rejections_total",
        "Requests rejected before any sandbox was allocated"
    )
    .expect("metric can be registered");
    pub static ref EXECUTION_DURATION: Histogram = register_histogram!(
        "runner_execution_duration_seconds",
        "Wall time spent handling an execution request",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
    )
    .expect("metric can be registered");
}

pub fn record_outcome(outcome: OutcomeKind) {
    EXECUTIONS_TOTAL.with_label_values(&[outcome.as_str()]).inc();
}

/// Text exposition of every registered metric
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
