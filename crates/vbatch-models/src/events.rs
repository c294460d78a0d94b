//! Progress events emitted by the scheduler.
//!
//! These form the append-only event contract consumed by the notification
//! layer; any pub/sub or in-memory broadcast implementation satisfies it.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::batch::{BatchCounters, BatchJob, BatchJobId};
use crate::stage::Stage;
use crate::unit::{VideoUnit, VideoUnitId};

/// Progress event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    /// Stage transition or retry on a unit
    Progress,
    /// A unit was dequeued and started
    VideoStarted,
    /// A unit completed all enabled stages
    VideoCompleted,
    /// A unit failed permanently
    VideoFailed,
    /// The batch reached a terminal state
    BatchCompleted,
}

impl ProgressEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressEventType::Progress => "progress",
            ProgressEventType::VideoStarted => "video_started",
            ProgressEventType::VideoCompleted => "video_completed",
            ProgressEventType::VideoFailed => "video_failed",
            ProgressEventType::BatchCompleted => "batch_completed",
        }
    }
}

/// One progress event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    /// Event kind
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,

    /// Batch this event belongs to
    pub batch_job_id: BatchJobId,

    /// Unit this event belongs to, for per-video events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<VideoUnitId>,

    /// Unit progress (0-100); batch-level events carry 100 or the
    /// aggregate completion percentage
    pub progress: u8,

    /// Stage currently executing, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,

    /// Free-form detail (retry notices, error messages, final status)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Units completed so far
    pub completed_count: u32,

    /// Units failed so far
    pub failed_count: u32,

    /// Units not yet terminal
    pub pending_count: u32,

    /// Estimated seconds until the batch settles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<u64>,

    /// Emission timestamp
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    fn base(event_type: ProgressEventType, job: &BatchJob) -> Self {
        let BatchCounters {
            completed_videos,
            failed_videos,
            ..
        } = job.counters;
        Self {
            event_type,
            batch_job_id: job.id.clone(),
            video_id: None,
            progress: 0,
            current_stage: None,
            message: None,
            completed_count: completed_videos,
            failed_count: failed_videos,
            pending_count: job.counters.pending(),
            estimated_time_remaining: job.estimated_time_remaining_secs(),
            timestamp: Utc::now(),
        }
    }

    /// Stage transition (or retry, with a message) on a unit.
    pub fn progress(job: &BatchJob, unit: &VideoUnit, message: Option<String>) -> Self {
        Self {
            video_id: Some(unit.id.clone()),
            progress: unit.progress,
            current_stage: unit.current_stage,
            message,
            ..Self::base(ProgressEventType::Progress, job)
        }
    }

    /// A unit was dequeued and started.
    pub fn video_started(job: &BatchJob, unit: &VideoUnit) -> Self {
        Self {
            video_id: Some(unit.id.clone()),
            progress: unit.progress,
            current_stage: unit.current_stage,
            ..Self::base(ProgressEventType::VideoStarted, job)
        }
    }

    /// A unit completed all enabled stages.
    pub fn video_completed(job: &BatchJob, unit: &VideoUnit) -> Self {
        Self {
            video_id: Some(unit.id.clone()),
            progress: 100,
            ..Self::base(ProgressEventType::VideoCompleted, job)
        }
    }

    /// A unit failed permanently.
    pub fn video_failed(job: &BatchJob, unit: &VideoUnit) -> Self {
        Self {
            video_id: Some(unit.id.clone()),
            progress: unit.progress,
            message: unit.error_message.clone(),
            ..Self::base(ProgressEventType::VideoFailed, job)
        }
    }

    /// The batch reached a terminal state.
    pub fn batch_completed(job: &BatchJob) -> Self {
        Self {
            progress: 100,
            message: Some(job.status.to_string()),
            ..Self::base(ProgressEventType::BatchCompleted, job)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::BatchSettings;
    use crate::unit::VideoRef;

    #[test]
    fn test_event_serialization_shape() {
        let mut job =
            BatchJob::new("u", "b", None, BatchSettings::default(), 3).unwrap();
        job.add_video(VideoRef::new("vid-1")).unwrap();
        let unit = job.units[0].clone();

        let event = ProgressEvent::video_started(&job, &unit);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"video_started\""));
        assert!(json.contains(&format!("\"video_id\":\"{}\"", unit.id)));
    }

    #[test]
    fn test_counts_reflect_job_counters() {
        let mut job =
            BatchJob::new("u", "b", None, BatchSettings::default(), 3).unwrap();
        job.add_video(VideoRef::new("a")).unwrap();
        job.add_video(VideoRef::new("b")).unwrap();
        job.units[0].fail("bad");
        job.recount();

        let event = ProgressEvent::video_failed(&job, &job.units[0].clone());
        assert_eq!(event.failed_count, 1);
        assert_eq!(event.pending_count, 1);
        assert_eq!(event.message.as_deref(), Some("bad"));
    }
}
