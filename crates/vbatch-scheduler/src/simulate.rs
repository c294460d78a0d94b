//! Scripted stage executor for tests and the self-check binary.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use vbatch_models::{BatchSettings, Stage, StageFailure, VideoRef};

use crate::executor::StageExecutor;

/// In-memory executor with scripted outcomes.
///
/// Every call succeeds with a plausible stage result unless a failure was
/// scripted for that (video, stage) pair; scripted failures are consumed
/// in order, so "fail twice then succeed" is expressed by scripting two
/// failures.
pub struct ScriptedExecutor {
    failures: Mutex<HashMap<(String, Stage), VecDeque<StageFailure>>>,
    stalls: Mutex<HashMap<(String, Stage), VecDeque<Duration>>>,
    calls: Mutex<Vec<(String, Stage)>>,
    latency: Duration,
}

impl ScriptedExecutor {
    /// Create an executor where every stage succeeds instantly.
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            stalls: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Add simulated per-stage latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script one failure for the next call on (video, stage).
    pub fn fail_once(&self, video_id: impl Into<String>, stage: Stage, failure: StageFailure) {
        self.fail_times(video_id, stage, failure, 1);
    }

    /// Script `count` consecutive failures for (video, stage).
    pub fn fail_times(
        &self,
        video_id: impl Into<String>,
        stage: Stage,
        failure: StageFailure,
        count: usize,
    ) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry((video_id.into(), stage)).or_default();
        for _ in 0..count {
            queue.push_back(failure.clone());
        }
    }

    /// Stall the next call on (video, stage) for `delay` before it
    /// succeeds. Simulates a worker that goes dark mid-stage.
    pub fn stall_once(&self, video_id: impl Into<String>, stage: Stage, delay: Duration) {
        self.stalls
            .lock()
            .unwrap()
            .entry((video_id.into(), stage))
            .or_default()
            .push_back(delay);
    }

    /// Every (video, stage) call so far, in order.
    pub fn calls(&self) -> Vec<(String, Stage)> {
        self.calls.lock().unwrap().clone()
    }

    fn scripted_failure(&self, video_id: &str, stage: Stage) -> Option<StageFailure> {
        let mut failures = self.failures.lock().unwrap();
        failures
            .get_mut(&(video_id.to_string(), stage))
            .and_then(|q| q.pop_front())
    }

    fn scripted_stall(&self, video_id: &str, stage: Stage) -> Option<Duration> {
        let mut stalls = self.stalls.lock().unwrap();
        stalls
            .get_mut(&(video_id.to_string(), stage))
            .and_then(|q| q.pop_front())
    }

    fn success_payload(stage: Stage, video: &VideoRef, settings: &BatchSettings) -> serde_json::Value {
        match stage {
            Stage::Uploading => json!({ "validated": true, "video": video.id }),
            Stage::Transcribing => json!({
                "language": settings.language,
                "segments": 42,
            }),
            Stage::RemovingSilence => json!({ "cuts": 7, "removed_secs": 31.5 }),
            Stage::DetectingHighlights => json!({
                "highlights": 3,
                "keywords": settings.keywords,
            }),
            Stage::Exporting => json!({ "output": format!("{}.out", video.id) }),
        }
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        stage: Stage,
        video: &VideoRef,
        settings: &BatchSettings,
    ) -> Result<serde_json::Value, StageFailure> {
        self.calls
            .lock()
            .unwrap()
            .push((video.id.clone(), stage));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(stall) = self.scripted_stall(&video.id, stage) {
            tokio::time::sleep(stall).await;
        }

        match self.scripted_failure(&video.id, stage) {
            Some(failure) => Err(failure),
            None => Ok(Self::success_payload(stage, video, settings)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failures_consumed_in_order() {
        let executor = ScriptedExecutor::new();
        let video = VideoRef::new("vid-1");
        let settings = BatchSettings::default();

        executor.fail_times(
            "vid-1",
            Stage::Transcribing,
            StageFailure::transient("flaky"),
            2,
        );

        assert!(executor
            .execute(Stage::Transcribing, &video, &settings)
            .await
            .is_err());
        assert!(executor
            .execute(Stage::Transcribing, &video, &settings)
            .await
            .is_err());
        assert!(executor
            .execute(Stage::Transcribing, &video, &settings)
            .await
            .is_ok());
        assert_eq!(executor.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_other_videos_unaffected() {
        let executor = ScriptedExecutor::new();
        executor.fail_once("vid-1", Stage::Exporting, StageFailure::permanent("bad"));

        let ok = executor
            .execute(
                Stage::Exporting,
                &VideoRef::new("vid-2"),
                &BatchSettings::default(),
            )
            .await;
        assert!(ok.is_ok());
    }
}
