//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Lease for unit {unit} already held by {holder}")]
    LeaseHeld { unit: String, holder: String },

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::PublishFailed(msg.into())
    }
}
