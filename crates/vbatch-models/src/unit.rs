//! Per-video progress tracking within a batch.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::batch::BatchJobId;
use crate::stage::Stage;

/// Default retry budget per unit.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique identifier for a video unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoUnitId(pub String);

impl VideoUnitId {
    /// Generate a new random unit ID.
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

impl Default for VideoUnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an externally stored video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRef {
    /// External video identifier
    pub id: String,

    /// Source URL, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Known media duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl VideoRef {
    /// Create a reference with just an ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: None,
            duration_secs: None,
        }
    }

    /// Attach a known duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }
}

/// Video unit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Waiting to be scheduled
    #[default]
    Pending,
    /// Upload validation in progress
    Uploading,
    /// Pipeline stages running
    Processing,
    /// All enabled stages succeeded
    Completed,
    /// Permanently failed (or retry budget exhausted)
    Failed,
    /// Cancelled by user or batch cancellation
    Cancelled,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Uploading => "uploading",
            UnitStatus::Processing => "processing",
            UnitStatus::Completed => "completed",
            UnitStatus::Failed => "failed",
            UnitStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitStatus::Completed | UnitStatus::Failed | UnitStatus::Cancelled
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress tracker for one video within a batch.
///
/// Mutated only by the scheduler (and explicit user retry/cancel actions);
/// status never moves backward except through the lease-reclaim reset.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoUnit {
    /// Unique unit ID
    pub id: VideoUnitId,

    /// Parent batch (weak back-reference; the batch owns the unit)
    pub batch_id: BatchJobId,

    /// External video being processed
    pub video: VideoRef,

    /// 0-based order within the batch
    pub position: u32,

    /// Unit state
    #[serde(default)]
    pub status: UnitStatus,

    /// Progress (0-100), non-decreasing while processing
    #[serde(default)]
    pub progress: u8,

    /// Stage currently executing, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Retry attempts consumed on the current stage
    #[serde(default)]
    pub retry_count: u32,

    /// Maximum retries allowed per stage
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-stage result blobs accumulated as stages complete
    #[serde(default)]
    pub results: BTreeMap<Stage, serde_json::Value>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Started at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Completed at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Progress value after finishing stage `idx` out of `total` stages.
pub fn stage_progress(idx: usize, total: usize) -> u8 {
    debug_assert!(total > 0 && idx < total);
    (((idx + 1) as f64 / total as f64) * 100.0).round() as u8
}

impl VideoUnit {
    /// Create a new pending unit.
    pub fn new(batch_id: BatchJobId, video: VideoRef, position: u32) -> Self {
        let now = Utc::now();
        Self {
            id: VideoUnitId::new(),
            batch_id,
            video,
            position,
            status: UnitStatus::Pending,
            progress: 0,
            current_stage: None,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            results: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Start processing at the given first stage.
    pub fn begin(&mut self, first_stage: Stage) {
        self.status = if first_stage == Stage::Uploading {
            UnitStatus::Uploading
        } else {
            UnitStatus::Processing
        };
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if self.current_stage.is_none() {
            self.current_stage = Some(first_stage);
        }
        self.updated_at = Utc::now();
    }

    /// Record a stage success: merge the result blob, advance progress and
    /// move to the next enabled stage. `retry_count` resets only when a
    /// next stage follows, so the final stage's retry count stays
    /// observable after completion.
    pub fn record_stage_success(
        &mut self,
        stage: Stage,
        result: serde_json::Value,
        stage_idx: usize,
        total_stages: usize,
        next: Option<Stage>,
    ) {
        self.results.insert(stage, result);
        self.progress = self.progress.max(stage_progress(stage_idx, total_stages));
        // A transient error from an earlier attempt is no longer relevant.
        self.error_message = None;
        self.updated_at = Utc::now();

        match next {
            Some(next_stage) => {
                self.current_stage = Some(next_stage);
                self.retry_count = 0;
                self.status = UnitStatus::Processing;
            }
            None => {
                self.current_stage = None;
                self.progress = 100;
                self.status = UnitStatus::Completed;
                self.completed_at = Some(Utc::now());
            }
        }
    }

    /// Record a transient failure on the current stage.
    ///
    /// Returns `true` if the retry budget still allows another attempt.
    /// `retry_count` never exceeds `max_retries`; once the budget is spent
    /// the caller marks the unit failed instead.
    pub fn record_transient_failure(&mut self, message: impl Into<String>) -> bool {
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            true
        } else {
            false
        }
    }

    /// Mark the unit as permanently failed.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = UnitStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Cancel the unit if not already terminal.
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = UnitStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Reset a unit whose lease expired back to pending, consuming one
    /// retry. The current stage and accumulated results are kept so work
    /// resumes where it stopped.
    pub fn reset_for_requeue(&mut self) -> bool {
        self.status = UnitStatus::Pending;
        self.updated_at = Utc::now();
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> VideoUnit {
        VideoUnit::new(BatchJobId::new(), VideoRef::new("vid-1"), 0)
    }

    #[test]
    fn test_stage_progress_rounding() {
        assert_eq!(stage_progress(0, 3), 33);
        assert_eq!(stage_progress(1, 3), 67);
        assert_eq!(stage_progress(2, 3), 100);
        assert_eq!(stage_progress(0, 1), 100);
    }

    #[test]
    fn test_begin_sets_stage_specific_status() {
        let mut u = unit();
        u.begin(Stage::Uploading);
        assert_eq!(u.status, UnitStatus::Uploading);
        assert!(u.started_at.is_some());

        let mut u = unit();
        u.begin(Stage::Transcribing);
        assert_eq!(u.status, UnitStatus::Processing);
        assert_eq!(u.current_stage, Some(Stage::Transcribing));
    }

    #[test]
    fn test_success_advances_and_resets_retries() {
        let mut u = unit();
        u.begin(Stage::Transcribing);
        u.retry_count = 2;

        u.record_stage_success(
            Stage::Transcribing,
            serde_json::json!({"words": 120}),
            0,
            2,
            Some(Stage::Exporting),
        );

        assert_eq!(u.status, UnitStatus::Processing);
        assert_eq!(u.current_stage, Some(Stage::Exporting));
        assert_eq!(u.retry_count, 0);
        assert_eq!(u.progress, 50);
    }

    #[test]
    fn test_final_stage_keeps_retry_count() {
        let mut u = unit();
        u.begin(Stage::Exporting);
        u.retry_count = 2;

        u.record_stage_success(Stage::Exporting, serde_json::json!({}), 0, 1, None);

        assert_eq!(u.status, UnitStatus::Completed);
        assert_eq!(u.progress, 100);
        assert_eq!(u.retry_count, 2);
        assert!(u.completed_at.is_some());
    }

    #[test]
    fn test_retry_budget() {
        let mut u = unit();
        u.begin(Stage::Transcribing);

        assert!(u.record_transient_failure("timeout"));
        assert!(u.record_transient_failure("timeout"));
        assert!(u.record_transient_failure("timeout"));
        assert!(!u.record_transient_failure("timeout"));
        assert_eq!(u.retry_count, 3);
    }

    #[test]
    fn test_success_clears_transient_error() {
        let mut u = unit();
        u.begin(Stage::Exporting);
        assert!(u.record_transient_failure("timeout"));
        assert!(u.error_message.is_some());

        u.record_stage_success(Stage::Exporting, serde_json::json!({}), 0, 1, None);

        assert_eq!(u.status, UnitStatus::Completed);
        assert!(u.error_message.is_none());
    }

    #[test]
    fn test_reset_for_requeue_keeps_stage_and_results() {
        let mut u = unit();
        u.begin(Stage::Transcribing);
        u.record_stage_success(
            Stage::Transcribing,
            serde_json::json!({"words": 120}),
            0,
            2,
            Some(Stage::Exporting),
        );

        assert!(u.reset_for_requeue());
        assert_eq!(u.status, UnitStatus::Pending);
        assert_eq!(u.retry_count, 1);
        // Work resumes at the recorded stage with earlier results intact.
        assert_eq!(u.current_stage, Some(Stage::Exporting));
        assert!(u.results.contains_key(&Stage::Transcribing));

        u.retry_count = u.max_retries;
        assert!(!u.reset_for_requeue());
    }

    #[test]
    fn test_cancel_is_idempotent_on_terminal() {
        let mut u = unit();
        u.fail("corrupt media");
        let completed_at = u.completed_at;
        u.cancel();
        assert_eq!(u.status, UnitStatus::Failed);
        assert_eq!(u.completed_at, completed_at);
    }
}
