//! Stage executor seam.
//!
//! Actual media work (upload validation, transcription, silence removal,
//! highlight detection, export) is supplied by the media-processing
//! subsystem behind this trait; the scheduler only calls it.

use async_trait::async_trait;

use vbatch_models::{BatchSettings, Stage, StageFailure, VideoRef};

/// Executes one pipeline stage for one video.
///
/// Implementations must be safe to call concurrently for different units
/// and must classify failures as transient or permanent; the scheduler
/// never retries a permanent failure. Timeouts are imposed by the caller.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run `stage` for `video` with the batch's settings.
    ///
    /// On success, returns an opaque result blob that the scheduler merges
    /// into the unit's accumulated `results`.
    async fn execute(
        &self,
        stage: Stage,
        video: &VideoRef,
        settings: &BatchSettings,
    ) -> Result<serde_json::Value, StageFailure>;
}
