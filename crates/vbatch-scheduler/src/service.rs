//! Batch control surface.
//!
//! [`BatchService`] is the front door for callers (API handlers, CLI): it
//! validates requests, owns the scheduler, and hands out per-batch progress
//! subscriptions backed by the in-memory broadcast channel.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;
use validator::Validate;

use vbatch_models::{
    AddVideosRequest, BatchJob, BatchJobId, CreateBatchRequest, ProgressEvent, ValidationError,
    MAX_BATCH_VIDEOS,
};
use vbatch_queue::BroadcastPublisher;

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::executor::StageExecutor;
use crate::scheduler::Scheduler;
use crate::store::JobStore;

/// Per-batch progress subscription.
///
/// Wraps the shared broadcast receiver and filters down to one batch.
/// A subscriber that falls behind the channel capacity loses the oldest
/// events and keeps going, matching pub/sub semantics.
pub struct ProgressStream {
    batch_id: BatchJobId,
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl ProgressStream {
    /// Wait for the next event of the subscribed batch. Returns `None`
    /// once the publisher side is gone.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.batch_job_id == self.batch_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// High-level batch orchestration service.
pub struct BatchService {
    store: Arc<JobStore>,
    scheduler: Arc<Scheduler>,
    events: Arc<BroadcastPublisher>,
}

impl BatchService {
    /// Create a service with the given stage executor. Call
    /// [`BatchService::start`] before submitting work.
    pub fn new(config: SchedulerConfig, executor: Arc<dyn StageExecutor>) -> Self {
        let events = Arc::new(BroadcastPublisher::new());
        let scheduler = Scheduler::new(config, executor, events.clone());
        Self {
            store: scheduler.store(),
            scheduler,
            events,
        }
    }

    /// Spawn the scheduler's worker pool.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Create a batch job from a validated request. The job is stored
    /// `Pending`; nothing runs until [`BatchService::submit`].
    pub async fn create_batch(
        &self,
        owner_id: &str,
        request: CreateBatchRequest,
    ) -> SchedulerResult<BatchJob> {
        request.validate()?;

        let mut job = BatchJob::new(
            owner_id,
            request.name,
            request.description,
            request.settings,
            request.priority,
        )?;
        for video in request.videos {
            job.add_video(video)?;
        }

        info!(
            batch_id = %job.id,
            owner_id,
            videos = job.units.len(),
            priority = job.priority,
            "Batch created"
        );
        let snapshot = job.clone();
        self.scheduler.register(job).await;
        Ok(snapshot)
    }

    /// Append videos to a batch that has not been submitted yet. Once
    /// [`BatchService::submit`] accepts a batch its video list is frozen,
    /// so every unit the scheduler will ever run is enqueued up front.
    pub async fn add_videos(
        &self,
        batch_id: &BatchJobId,
        request: AddVideosRequest,
    ) -> SchedulerResult<BatchJob> {
        request.validate()?;

        self.store
            .with_job_mut(batch_id, |job| {
                if !job.accepts_videos() {
                    return Err(SchedulerError::invalid_state("add videos to", job.status));
                }
                if job.units.len() + request.videos.len() > MAX_BATCH_VIDEOS {
                    return Err(ValidationError::BatchSizeOutOfRange {
                        got: job.units.len() + request.videos.len(),
                        max: MAX_BATCH_VIDEOS,
                    }
                    .into());
                }
                for video in request.videos {
                    job.add_video(video)?;
                }
                Ok(job.clone())
            })
            .await?
    }

    /// Submit a pending batch for execution.
    pub async fn submit(&self, batch_id: &BatchJobId) -> SchedulerResult<usize> {
        self.scheduler.submit(batch_id).await
    }

    /// Pause a batch; in-flight units finish, queued ones wait.
    pub async fn pause(&self, batch_id: &BatchJobId) -> SchedulerResult<()> {
        self.scheduler.pause(batch_id).await
    }

    /// Resume a paused batch.
    pub async fn resume(&self, batch_id: &BatchJobId) -> SchedulerResult<usize> {
        self.scheduler.resume(batch_id).await
    }

    /// Cancel a batch and every non-terminal unit in it.
    pub async fn cancel(&self, batch_id: &BatchJobId) -> SchedulerResult<()> {
        self.scheduler.cancel(batch_id).await
    }

    /// Delete a batch. A running batch is cancelled first, so its units
    /// go with it (the batch owns them).
    pub async fn delete(&self, batch_id: &BatchJobId) -> SchedulerResult<()> {
        match self.scheduler.cancel(batch_id).await {
            Ok(()) | Err(SchedulerError::InvalidState { .. }) => {}
            Err(e) => return Err(e),
        }
        self.store.remove(batch_id).await?;
        info!(batch_id = %batch_id, "Batch deleted");
        Ok(())
    }

    /// Snapshot of a batch with all of its units.
    pub async fn batch_status(&self, batch_id: &BatchJobId) -> SchedulerResult<BatchJob> {
        self.store.get(batch_id).await
    }

    /// Snapshots of every batch owned by a user, newest first.
    pub async fn list_batches(&self, owner_id: &str) -> Vec<BatchJob> {
        self.store.list_for_owner(owner_id).await
    }

    /// Subscribe to progress events for one batch.
    pub fn subscribe(&self, batch_id: &BatchJobId) -> ProgressStream {
        ProgressStream {
            batch_id: batch_id.clone(),
            receiver: self.events.subscribe(),
        }
    }

    /// Drain in-flight work and stop the scheduler.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
