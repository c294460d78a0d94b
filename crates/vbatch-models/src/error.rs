//! Validation error types.

use thiserror::Error;

use crate::stage::Stage;

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Errors rejected synchronously at submission, before any unit is created.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Batch must contain between 1 and {max} videos, got {got}")]
    BatchSizeOutOfRange { got: usize, max: usize },

    #[error("Duplicate video in batch: {0}")]
    DuplicateVideo(String),

    #[error("Settings enable no stages")]
    EmptyPipeline,

    #[error("Stage configured more than once: {0}")]
    DuplicateStage(Stage),

    #[error("Priority must be 0-10, got {0}")]
    PriorityOutOfRange(u8),

    #[error("Batch name must not be empty")]
    EmptyName,
}
