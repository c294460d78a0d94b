//! In-process batch job store.
//!
//! The persistence seam: every BatchJob/VideoUnit mutation flows through
//! `with_job_mut`, which serializes writers, so the scheduler has a single
//! writer per aggregate and a transition is committed before the next unit
//! is dequeued. API handlers read snapshots; they never touch counters.

use std::collections::HashMap;

use tokio::sync::RwLock;

use vbatch_models::{BatchJob, BatchJobId, VideoUnitId};

use crate::error::{SchedulerError, SchedulerResult};

/// Registry of batch jobs.
pub struct JobStore {
    jobs: RwLock<HashMap<BatchJobId, BatchJob>>,
}

impl JobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new job.
    pub async fn insert(&self, job: BatchJob) {
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    /// Snapshot of one job (with its units).
    pub async fn get(&self, id: &BatchJobId) -> SchedulerResult<BatchJob> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::job_not_found(id))
    }

    /// Read access to one job.
    pub async fn with_job<R>(
        &self,
        id: &BatchJobId,
        f: impl FnOnce(&BatchJob) -> R,
    ) -> SchedulerResult<R> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(id).ok_or_else(|| SchedulerError::job_not_found(id))?;
        Ok(f(job))
    }

    /// Serialized write access to one job.
    pub async fn with_job_mut<R>(
        &self,
        id: &BatchJobId,
        f: impl FnOnce(&mut BatchJob) -> R,
    ) -> SchedulerResult<R> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::job_not_found(id))?;
        Ok(f(job))
    }

    /// Find which batch owns a unit (lease-reclaim path).
    pub async fn find_unit_batch(&self, unit_id: &VideoUnitId) -> Option<BatchJobId> {
        self.jobs
            .read()
            .await
            .values()
            .find(|job| job.unit(unit_id).is_some())
            .map(|job| job.id.clone())
    }

    /// Remove a job, returning it.
    pub async fn remove(&self, id: &BatchJobId) -> SchedulerResult<BatchJob> {
        self.jobs
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SchedulerError::job_not_found(id))
    }

    /// Snapshot of all jobs owned by a user.
    pub async fn list_for_owner(&self, owner_id: &str) -> Vec<BatchJob> {
        let mut jobs: Vec<BatchJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.owner_id == owner_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Total number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vbatch_models::{BatchSettings, VideoRef};

    fn job() -> BatchJob {
        let mut job =
            BatchJob::new("user-1", "batch", None, BatchSettings::default(), 5).unwrap();
        job.add_video(VideoRef::new("vid-1")).unwrap();
        job
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = JobStore::new();
        let job = job();
        let id = job.id.clone();
        store.insert(job).await;

        assert_eq!(store.get(&id).await.unwrap().name, "batch");
        assert!(matches!(
            store.get(&BatchJobId::new()).await,
            Err(SchedulerError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_with_job_mut_commits() {
        let store = JobStore::new();
        let job = job();
        let id = job.id.clone();
        store.insert(job).await;

        store
            .with_job_mut(&id, |job| job.mark_processing())
            .await
            .unwrap();

        let snapshot = store.get(&id).await.unwrap();
        assert!(snapshot.started_at.is_some());
    }

    #[tokio::test]
    async fn test_find_unit_batch() {
        let store = JobStore::new();
        let job = job();
        let id = job.id.clone();
        let unit_id = job.units[0].id.clone();
        store.insert(job).await;

        assert_eq!(store.find_unit_batch(&unit_id).await, Some(id));
        assert_eq!(store.find_unit_batch(&VideoUnitId::new()).await, None);
    }
}
