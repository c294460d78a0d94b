//! Scheduler metrics collection.
//!
//! Provides standardized metrics for monitoring the orchestrator:
//! - Unit completion/failure counters
//! - Retry counters by stage
//! - Stage latency histograms

use metrics::{counter, histogram};

use vbatch_models::{BatchStatus, Stage};

/// Metric name constants for consistency.
pub mod names {
    /// Terminal video units by outcome.
    pub const UNITS_TOTAL: &str = "vbatch_units_total";

    /// Retry attempts by stage.
    pub const RETRIES_TOTAL: &str = "vbatch_retries_total";

    /// Stage execution latency in seconds by stage.
    pub const STAGE_LATENCY_SECONDS: &str = "vbatch_stage_latency_seconds";

    /// Finalized batches by final status.
    pub const BATCHES_TOTAL: &str = "vbatch_batches_total";
}

/// Record a unit reaching a terminal state.
pub fn record_unit_terminal(outcome: &'static str) {
    counter!(names::UNITS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a retry attempt.
pub fn record_retry(stage: Stage) {
    counter!(names::RETRIES_TOTAL, "stage" => stage.as_str()).increment(1);
}

/// Record the latency of one stage execution.
pub fn record_stage_latency(stage: Stage, seconds: f64) {
    histogram!(names::STAGE_LATENCY_SECONDS, "stage" => stage.as_str()).record(seconds);
}

/// Record a batch reaching a terminal state.
pub fn record_batch_finalized(status: BatchStatus) {
    counter!(names::BATCHES_TOTAL, "status" => status.as_str()).increment(1);
}
