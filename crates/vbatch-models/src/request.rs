//! Control-surface request payloads.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::settings::BatchSettings;
use crate::unit::VideoRef;

/// Largest batch accepted at creation.
pub const MAX_BATCH_VIDEOS: usize = 50;

/// Request to create a batch job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct CreateBatchRequest {
    /// Display name
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Processing settings shared by every video
    pub settings: BatchSettings,

    /// Priority 0-10, higher scheduled first
    #[serde(default)]
    #[validate(range(min = 0, max = 10))]
    pub priority: u8,

    /// Videos to process, in the order they should run
    #[validate(length(min = 1, max = 50))]
    pub videos: Vec<VideoRef>,
}

/// Request to append videos to a still-pending batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct AddVideosRequest {
    /// Videos to append, processed after the existing ones
    #[validate(length(min = 1, max = 50))]
    pub videos: Vec<VideoRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(videos: Vec<VideoRef>) -> CreateBatchRequest {
        CreateBatchRequest {
            name: "batch".into(),
            description: None,
            settings: BatchSettings::default(),
            priority: 5,
            videos,
        }
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(request(vec![]).validate().is_err());
    }

    #[test]
    fn test_oversized_batch_rejected() {
        let videos = (0..51).map(|i| VideoRef::new(format!("v{i}"))).collect();
        assert!(request(videos).validate().is_err());
    }

    #[test]
    fn test_priority_bound() {
        let mut req = request(vec![VideoRef::new("a")]);
        assert!(req.validate().is_ok());
        req.priority = 11;
        assert!(req.validate().is_err());
    }
}
