//! Scheduler error types.
//!
//! Control-surface calls fail only for validation, not-found, or
//! wrong-state reasons. Stage failures never surface here; they are
//! captured into the unit's `error_message`/`status` fields.

use thiserror::Error;

use vbatch_models::BatchStatus;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Validation failed: {0}")]
    Validation(#[from] vbatch_models::ValidationError),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] validator::ValidationErrors),

    #[error("Batch job not found: {0}")]
    JobNotFound(String),

    #[error("Video unit not found: {0}")]
    UnitNotFound(String),

    #[error("Cannot {action} a batch in state {status}")]
    InvalidState {
        action: &'static str,
        status: BatchStatus,
    },

    #[error("Queue error: {0}")]
    Queue(#[from] vbatch_queue::QueueError),
}

impl SchedulerError {
    pub fn job_not_found(id: impl std::fmt::Display) -> Self {
        Self::JobNotFound(id.to_string())
    }

    pub fn unit_not_found(id: impl std::fmt::Display) -> Self {
        Self::UnitNotFound(id.to_string())
    }

    pub fn invalid_state(action: &'static str, status: BatchStatus) -> Self {
        Self::InvalidState { action, status }
    }
}
