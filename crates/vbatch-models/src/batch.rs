//! Batch job aggregate: a named collection of video units with shared
//! settings, a priority, and aggregate counters.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ValidationError, ValidationResult};
use crate::settings::BatchSettings;
use crate::unit::{UnitStatus, VideoRef, VideoUnit, VideoUnitId};

/// Highest allowed batch priority.
pub const MAX_PRIORITY: u8 = 10;

/// Unique identifier for a batch job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct BatchJobId(pub String);

impl BatchJobId {
    /// Generate a new random batch job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Batch job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, not yet picked up by the scheduler
    #[default]
    Pending,
    /// At least one unit has been dequeued
    Processing,
    /// Dequeuing suspended; in-flight units finish
    Paused,
    /// Ran to completion (possibly with failed units recorded)
    Completed,
    /// Pure total failure: every unit failed
    Failed,
    /// Cancelled by user action
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Paused => "paused",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate counters over a batch's units.
///
/// Invariant: `completed + failed + cancelled <= total`, with equality once
/// the batch is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct BatchCounters {
    pub total_videos: u32,
    pub completed_videos: u32,
    pub failed_videos: u32,
    pub cancelled_videos: u32,
    pub total_duration_secs: f64,
    pub processed_duration_secs: f64,
}

impl BatchCounters {
    /// Units in a terminal state.
    pub fn settled(&self) -> u32 {
        self.completed_videos + self.failed_videos + self.cancelled_videos
    }

    /// Units not yet terminal.
    pub fn pending(&self) -> u32 {
        self.total_videos.saturating_sub(self.settled())
    }

    /// Check if every unit has reached a terminal state.
    pub fn all_settled(&self) -> bool {
        self.settled() >= self.total_videos
    }
}

/// The aggregate root: N videos + shared settings + priority.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BatchJob {
    /// Unique batch job ID
    pub id: BatchJobId,

    /// Owning user
    pub owner_id: String,

    /// Display name
    pub name: String,

    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Immutable processing settings chosen at creation
    pub settings: BatchSettings,

    /// Priority 0-10, higher scheduled first
    pub priority: u8,

    /// Batch state
    #[serde(default)]
    pub status: BatchStatus,

    /// Aggregate counters
    #[serde(default)]
    pub counters: BatchCounters,

    /// Set when the batch itself was cancelled (as opposed to individual
    /// units); decides CANCELLED-vs-COMPLETED at finalization.
    #[serde(default)]
    pub cancel_requested: bool,

    /// When the batch was handed to the scheduler. The batch itself stays
    /// `Pending` until the first dequeue, so this is what gates
    /// mutations like adding videos.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Started at timestamp (first dequeue)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Completed at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Owned units, insertion order = processing position
    #[serde(default)]
    pub units: Vec<VideoUnit>,
}

impl BatchJob {
    /// Create a new empty batch. Settings are validated and normalized;
    /// units are added with [`BatchJob::add_video`].
    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        mut settings: BatchSettings,
        priority: u8,
    ) -> ValidationResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if priority > MAX_PRIORITY {
            return Err(ValidationError::PriorityOutOfRange(priority));
        }
        settings.validate()?;

        let now = Utc::now();
        Ok(Self {
            id: BatchJobId::new(),
            owner_id: owner_id.into(),
            name,
            description,
            settings,
            priority,
            status: BatchStatus::Pending,
            counters: BatchCounters::default(),
            cancel_requested: false,
            submitted_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            units: Vec::new(),
        })
    }

    /// Append a pending unit for a video. Rejects duplicates of a video
    /// already present in the batch.
    pub fn add_video(&mut self, video: VideoRef) -> ValidationResult<&VideoUnit> {
        if self.units.iter().any(|u| u.video.id == video.id) {
            return Err(ValidationError::DuplicateVideo(video.id));
        }

        let position = self.units.len() as u32;
        let unit = VideoUnit::new(self.id.clone(), video, position);
        self.units.push(unit);
        self.recount();
        Ok(self.units.last().unwrap())
    }

    /// Look up a unit by ID.
    pub fn unit(&self, unit_id: &VideoUnitId) -> Option<&VideoUnit> {
        self.units.iter().find(|u| &u.id == unit_id)
    }

    /// Look up a unit by ID, mutably.
    pub fn unit_mut(&mut self, unit_id: &VideoUnitId) -> Option<&mut VideoUnit> {
        self.units.iter_mut().find(|u| &u.id == unit_id)
    }

    /// Hand the batch to the scheduler. Only a pending batch that has not
    /// been submitted before is accepted; after this, the video list is
    /// frozen.
    pub fn mark_submitted(&mut self) -> bool {
        if self.status != BatchStatus::Pending || self.submitted_at.is_some() {
            return false;
        }
        self.submitted_at = Some(Utc::now());
        self.updated_at = Utc::now();
        true
    }

    /// Check whether the video list can still be extended.
    pub fn accepts_videos(&self) -> bool {
        self.status == BatchStatus::Pending && self.submitted_at.is_none()
    }

    /// Mark the batch processing on first dequeue.
    pub fn mark_processing(&mut self) {
        if self.status == BatchStatus::Pending {
            self.status = BatchStatus::Processing;
            self.started_at = Some(Utc::now());
            self.updated_at = Utc::now();
        }
    }

    /// Pause dequeuing; in-flight units finish.
    pub fn pause(&mut self) -> bool {
        if matches!(self.status, BatchStatus::Pending | BatchStatus::Processing) {
            self.status = BatchStatus::Paused;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// Resume a paused batch.
    pub fn resume(&mut self) -> bool {
        if self.status == BatchStatus::Paused {
            // Back to Processing if work already started, else Pending.
            self.status = if self.started_at.is_some() {
                BatchStatus::Processing
            } else {
                BatchStatus::Pending
            };
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// Cancel the batch: every non-terminal unit is immediately marked
    /// cancelled and the batch goes terminal. In-flight stage executions
    /// are not interrupted; their results are discarded on return.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.cancel_requested = true;
        for unit in &mut self.units {
            unit.cancel();
        }
        self.recount();
        self.status = BatchStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
        true
    }

    /// Recompute aggregate counters from the owned units.
    pub fn recount(&mut self) {
        let mut counters = BatchCounters {
            total_videos: self.units.len() as u32,
            ..BatchCounters::default()
        };
        for unit in &self.units {
            let duration = unit.video.duration_secs.unwrap_or(0.0);
            counters.total_duration_secs += duration;
            match unit.status {
                UnitStatus::Completed => {
                    counters.completed_videos += 1;
                    counters.processed_duration_secs += duration;
                }
                UnitStatus::Failed => counters.failed_videos += 1,
                UnitStatus::Cancelled => counters.cancelled_videos += 1,
                _ => {}
            }
        }
        self.counters = counters;
        self.updated_at = Utc::now();
    }

    /// Finalize the batch once every unit is terminal.
    ///
    /// Policy: partial failure still yields COMPLETED with the failed count
    /// recorded; FAILED is reserved for pure total failure. Cancellations
    /// dominate only when the batch itself was cancelled (then `cancel`
    /// already went terminal and this is a no-op).
    pub fn finalize_if_settled(&mut self) -> Option<BatchStatus> {
        if self.status.is_terminal() || !self.counters.all_settled() {
            return None;
        }

        let c = &self.counters;
        self.status = if c.failed_videos > 0 && c.completed_videos == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
        Some(self.status)
    }

    /// Rough time-remaining estimate in seconds, derived from the average
    /// time per settled unit. `None` until at least one unit settles.
    pub fn estimated_time_remaining_secs(&self) -> Option<u64> {
        if self.status.is_terminal() {
            return Some(0);
        }
        let started = self.started_at?;
        let settled = self.counters.settled();
        if settled == 0 {
            return None;
        }
        let elapsed = (Utc::now() - started).num_seconds().max(0) as f64;
        let per_unit = elapsed / settled as f64;
        Some((per_unit * self.counters.pending() as f64).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::StageParams;

    fn job() -> BatchJob {
        BatchJob::new(
            "user-1",
            "podcast backlog",
            None,
            BatchSettings::default(),
            5,
        )
        .unwrap()
    }

    #[test]
    fn test_priority_validated() {
        let err = BatchJob::new("u", "b", None, BatchSettings::default(), 11).unwrap_err();
        assert_eq!(err, ValidationError::PriorityOutOfRange(11));
    }

    #[test]
    fn test_duplicate_video_rejected() {
        let mut job = job();
        job.add_video(VideoRef::new("vid-1")).unwrap();
        let err = job.add_video(VideoRef::new("vid-1")).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateVideo("vid-1".into()));
    }

    #[test]
    fn test_positions_follow_insertion_order() {
        let mut job = job();
        job.add_video(VideoRef::new("a")).unwrap();
        job.add_video(VideoRef::new("b")).unwrap();
        job.add_video(VideoRef::new("c")).unwrap();
        let positions: Vec<u32> = job.units.iter().map(|u| u.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(job.counters.total_videos, 3);
    }

    #[test]
    fn test_counter_invariant_and_finalize_completed() {
        let mut job = job();
        for id in ["a", "b", "c"] {
            job.add_video(VideoRef::new(id).with_duration(60.0)).unwrap();
        }
        job.mark_processing();

        for i in 0..3 {
            assert!(job.counters.settled() <= job.counters.total_videos);
            let unit = &mut job.units[i];
            unit.begin(crate::Stage::Transcribing);
            unit.record_stage_success(
                crate::Stage::Transcribing,
                serde_json::json!({}),
                0,
                1,
                None,
            );
            job.recount();
        }

        assert_eq!(job.finalize_if_settled(), Some(BatchStatus::Completed));
        assert_eq!(job.counters.settled(), job.counters.total_videos);
        assert_eq!(job.counters.processed_duration_secs, 180.0);
    }

    #[test]
    fn test_partial_failure_still_completes() {
        let mut job = job();
        job.add_video(VideoRef::new("a")).unwrap();
        job.add_video(VideoRef::new("b")).unwrap();
        job.mark_processing();

        job.units[0].fail("corrupt media");
        job.units[1].begin(crate::Stage::Transcribing);
        job.units[1].record_stage_success(
            crate::Stage::Transcribing,
            serde_json::json!({}),
            0,
            1,
            None,
        );
        job.recount();

        assert_eq!(job.finalize_if_settled(), Some(BatchStatus::Completed));
        assert_eq!(job.counters.failed_videos, 1);
        assert_eq!(job.counters.completed_videos, 1);
    }

    #[test]
    fn test_total_failure_fails_batch() {
        let mut job = job();
        job.add_video(VideoRef::new("a")).unwrap();
        job.mark_processing();
        job.units[0].fail("corrupt media");
        job.recount();
        assert_eq!(job.finalize_if_settled(), Some(BatchStatus::Failed));
    }

    #[test]
    fn test_cancel_marks_all_units() {
        let mut job = job();
        for id in ["a", "b", "c"] {
            job.add_video(VideoRef::new(id)).unwrap();
        }
        job.mark_processing();
        job.units[0].begin(crate::Stage::Transcribing);
        job.units[0].record_stage_success(
            crate::Stage::Transcribing,
            serde_json::json!({}),
            0,
            1,
            None,
        );
        job.recount();

        assert!(job.cancel());
        assert_eq!(job.status, BatchStatus::Cancelled);
        assert_eq!(job.counters.completed_videos, 1);
        assert_eq!(job.counters.cancelled_videos, 2);
        assert!(job.counters.all_settled());
        // Terminal, further transitions refused.
        assert!(!job.cancel());
        assert!(!job.pause());
    }

    #[test]
    fn test_submission_freezes_video_list() {
        let mut job = job();
        job.add_video(VideoRef::new("a")).unwrap();
        assert!(job.accepts_videos());

        assert!(job.mark_submitted());
        assert!(!job.accepts_videos());
        // A second submission is refused even while still pending.
        assert!(!job.mark_submitted());
        assert_eq!(job.status, BatchStatus::Pending);
    }

    #[test]
    fn test_pause_resume_roundtrip() {
        let mut job = job();
        job.add_video(VideoRef::new("a")).unwrap();
        job.mark_processing();
        assert!(job.pause());
        assert_eq!(job.status, BatchStatus::Paused);
        assert!(job.resume());
        assert_eq!(job.status, BatchStatus::Processing);
    }

    #[test]
    fn test_settings_normalized_at_creation() {
        let job = BatchJob::new(
            "u",
            "b",
            None,
            BatchSettings {
                stages: vec![
                    StageParams::Export {
                        format: Default::default(),
                        quality: Default::default(),
                    },
                    StageParams::Upload,
                ],
                language: "en".into(),
                keywords: vec![],
            },
            0,
        )
        .unwrap();
        assert_eq!(
            job.settings.stage_sequence(),
            vec![crate::Stage::Uploading, crate::Stage::Exporting]
        );
    }
}
