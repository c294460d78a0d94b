//! The batch scheduler: worker pool, admission control, lease reclaim.
//!
//! Units flow submit -> ready queue -> worker -> pipeline. A fixed pool of
//! workers pops the global priority queue, so at most `max_concurrent_units`
//! stage executions run at once; a soft per-job cap keeps one huge batch
//! from starving the pool. Every mutation of job state goes through the
//! store's serialized write path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use vbatch_models::{BatchJob, BatchJobId, BatchStatus, ProgressEvent, UnitStatus, VideoUnit};
use vbatch_queue::{LeaseMap, ProgressPublisher, ReadyEntry, ReadyQueue};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::executor::StageExecutor;
use crate::metrics;
use crate::pipeline::{self, PipelineCtx};
use crate::store::JobStore;

/// Delay before re-offering an entry that hit the per-job cap or a held
/// lease, so the worker does not spin on the same entry.
const REQUEUE_DELAY: Duration = Duration::from_millis(25);

/// Orchestrates batch execution over a shared job store.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<JobStore>,
    queue: Arc<ReadyQueue>,
    leases: Arc<LeaseMap>,
    publisher: Arc<dyn ProgressPublisher>,
    executor: Arc<dyn StageExecutor>,
    submit_seq: AtomicU64,
    inflight_per_job: Mutex<HashMap<BatchJobId, usize>>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// What a worker should do with a popped entry.
enum Admission {
    Run,
    /// Job paused/terminal/missing or unit no longer pending.
    Drop(&'static str),
    /// Per-job cap or lease contention; offer the entry again shortly.
    Defer,
}

impl Scheduler {
    /// Create a scheduler. Call [`Scheduler::start`] to spawn the workers.
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<dyn StageExecutor>,
        publisher: Arc<dyn ProgressPublisher>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            store: Arc::new(JobStore::new()),
            queue: Arc::new(ReadyQueue::new()),
            leases: Arc::new(LeaseMap::new()),
            publisher,
            executor,
            submit_seq: AtomicU64::new(0),
            inflight_per_job: Mutex::new(HashMap::new()),
            shutdown,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// The shared job store.
    pub fn store(&self) -> Arc<JobStore> {
        Arc::clone(&self.store)
    }

    /// Queued (not yet dequeued) unit count.
    pub fn queued_units(&self) -> usize {
        self.queue.len()
    }

    /// Spawn the worker pool and the lease-reclaim loop.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap();
        if !workers.is_empty() {
            return;
        }
        info!(
            workers = self.config.max_concurrent_units,
            per_job_limit = self.config.per_job_limit,
            "Starting scheduler"
        );
        for worker_id in 0..self.config.max_concurrent_units {
            let scheduler = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                scheduler.worker_loop(worker_id).await;
            }));
        }
        let scheduler = Arc::clone(self);
        workers.push(tokio::spawn(async move {
            scheduler.reclaim_loop().await;
        }));
    }

    /// Register a new batch job with the store. The job stays `Pending`
    /// until [`Scheduler::submit`] is called.
    pub async fn register(&self, job: BatchJob) {
        self.store.insert(job).await;
    }

    /// Submit a pending batch for execution: every pending unit is
    /// enqueued and the video list is frozen. Returns the number of units
    /// enqueued. Submitting twice is refused.
    pub async fn submit(&self, batch_id: &BatchJobId) -> SchedulerResult<usize> {
        let seq = self.submit_seq.fetch_add(1, Ordering::Relaxed);
        let entries = self
            .store
            .with_job_mut(batch_id, |job| {
                if !job.mark_submitted() {
                    return Err(SchedulerError::invalid_state("submit", job.status));
                }
                Ok(pending_entries(job, seq))
            })
            .await??;

        let count = entries.len();
        for entry in entries {
            self.queue.push(entry);
        }
        info!(batch_id = %batch_id, units = count, "Batch submitted");
        Ok(count)
    }

    /// Pause a batch: queued units are withdrawn, in-flight units finish.
    pub async fn pause(&self, batch_id: &BatchJobId) -> SchedulerResult<()> {
        self.store
            .with_job_mut(batch_id, |job| {
                if job.pause() {
                    Ok(())
                } else {
                    Err(SchedulerError::invalid_state("pause", job.status))
                }
            })
            .await??;
        let removed = self.queue.remove_batch(batch_id);
        info!(batch_id = %batch_id, withdrawn = removed, "Batch paused");
        Ok(())
    }

    /// Resume a paused batch: pending units are re-enqueued.
    pub async fn resume(&self, batch_id: &BatchJobId) -> SchedulerResult<usize> {
        let seq = self.submit_seq.fetch_add(1, Ordering::Relaxed);
        let entries = self
            .store
            .with_job_mut(batch_id, |job| {
                if job.resume() {
                    Ok(pending_entries(job, seq))
                } else {
                    Err(SchedulerError::invalid_state("resume", job.status))
                }
            })
            .await??;

        let count = entries.len();
        for entry in entries {
            self.queue.push(entry);
        }
        info!(batch_id = %batch_id, units = count, "Batch resumed");
        Ok(count)
    }

    /// Cancel a batch: queued units are withdrawn and every non-terminal
    /// unit is marked cancelled. In-flight stage executions run to their
    /// next commit point, where the result is discarded.
    pub async fn cancel(&self, batch_id: &BatchJobId) -> SchedulerResult<()> {
        let event = self
            .store
            .with_job_mut(batch_id, |job| {
                if job.cancel() {
                    Ok(ProgressEvent::batch_completed(job))
                } else {
                    Err(SchedulerError::invalid_state("cancel", job.status))
                }
            })
            .await??;
        self.queue.remove_batch(batch_id);
        metrics::record_batch_finalized(BatchStatus::Cancelled);
        self.publish(&event).await;
        info!(batch_id = %batch_id, "Batch cancelled");
        Ok(())
    }

    /// Drain and stop. Closes the queue, waits up to the configured
    /// shutdown timeout for in-flight units to reach a commit point.
    pub async fn shutdown(&self) {
        info!("Scheduler shutting down");
        self.queue.close();
        let _ = self.shutdown.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            match timeout(self.config.shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Worker task panicked"),
                Err(_) => warn!("Worker did not drain within shutdown timeout"),
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        let holder = format!("worker-{worker_id}");
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                entry = self.queue.pop() => match entry {
                    Some(entry) => self.handle_entry(entry, &holder).await,
                    None => break,
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(holder, "Worker stopped");
    }

    async fn handle_entry(&self, entry: ReadyEntry, holder: &str) {
        match self.admit(&entry).await {
            Admission::Drop(reason) => {
                debug!(
                    batch_id = %entry.batch_id,
                    unit_id = %entry.unit_id,
                    reason,
                    "Dropping queued unit"
                );
                return;
            }
            Admission::Defer => {
                sleep(REQUEUE_DELAY).await;
                self.queue.push(entry);
                return;
            }
            Admission::Run => {}
        }

        if let Err(e) = self
            .leases
            .acquire(&entry.unit_id, holder, self.config.lease_ttl)
        {
            debug!(unit_id = %entry.unit_id, error = %e, "Lease contention, deferring");
            self.end_job(&entry.batch_id);
            sleep(REQUEUE_DELAY).await;
            self.queue.push(entry);
            return;
        }

        self.run_leased(&entry, holder).await;

        self.leases.release(&entry.unit_id, holder);
        self.end_job(&entry.batch_id);
        self.finalize(&entry.batch_id).await;
    }

    /// Check job/unit state and claim a per-job slot.
    async fn admit(&self, entry: &ReadyEntry) -> Admission {
        let state = self
            .store
            .with_job(&entry.batch_id, |job| {
                (job.status, job.unit(&entry.unit_id).map(|u| u.status))
            })
            .await;

        match state {
            Err(_) => return Admission::Drop("job deleted"),
            Ok((status, _)) if status.is_terminal() => return Admission::Drop("job terminal"),
            Ok((BatchStatus::Paused, _)) => return Admission::Drop("job paused"),
            Ok((_, None)) => return Admission::Drop("unit missing"),
            Ok((_, Some(unit_status))) if unit_status != UnitStatus::Pending => {
                return Admission::Drop("unit not pending");
            }
            Ok(_) => {}
        }

        if self.try_begin_job(&entry.batch_id) {
            Admission::Run
        } else {
            Admission::Defer
        }
    }

    /// Mark the unit started and run the pipeline. The lease is held.
    async fn run_leased(&self, entry: &ReadyEntry, holder: &str) {
        let started = self
            .store
            .with_job_mut(&entry.batch_id, |job| {
                let sequence = job.settings.stage_sequence();
                let Some(unit) = job.unit_mut(&entry.unit_id) else {
                    return None;
                };
                if unit.status != UnitStatus::Pending {
                    return None;
                }
                let first_stage = unit.current_stage.or_else(|| sequence.first().copied())?;
                unit.begin(first_stage);
                job.mark_processing();
                let unit = job.unit(&entry.unit_id).cloned()?;
                Some(ProgressEvent::video_started(job, &unit))
            })
            .await
            .ok()
            .flatten();

        let Some(event) = started else {
            debug!(unit_id = %entry.unit_id, "Unit no longer runnable, skipping");
            return;
        };
        self.publish(&event).await;

        let ctx = PipelineCtx {
            store: Arc::clone(&self.store),
            executor: Arc::clone(&self.executor),
            publisher: Arc::clone(&self.publisher),
            leases: Arc::clone(&self.leases),
            backoff: self.config.backoff(),
            stage_timeout: self.config.stage_timeout,
        };
        pipeline::run_unit(&ctx, &entry.batch_id, &entry.unit_id, holder).await;
    }

    /// Finalize the batch if every unit has settled.
    async fn finalize(&self, batch_id: &BatchJobId) {
        let finalized = self
            .store
            .with_job_mut(batch_id, |job| {
                job.recount();
                job.finalize_if_settled()
                    .map(|status| (status, ProgressEvent::batch_completed(job)))
            })
            .await
            .ok()
            .flatten();

        if let Some((status, event)) = finalized {
            info!(batch_id = %batch_id, status = %status, "Batch finalized");
            metrics::record_batch_finalized(status);
            self.publish(&event).await;
        }
    }

    async fn reclaim_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = interval(self.config.reclaim_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.reclaim_expired().await,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Requeue units whose lease outlived its TTL (worker lost or stuck).
    /// Each takeover consumes one retry; an exhausted unit fails instead.
    async fn reclaim_expired(&self) {
        for unit_id in self.leases.reclaim_expired() {
            let Some(batch_id) = self.store.find_unit_batch(&unit_id).await else {
                continue;
            };
            warn!(batch_id = %batch_id, unit_id = %unit_id, "Reclaiming expired lease");

            let seq = self.submit_seq.fetch_add(1, Ordering::Relaxed);
            let outcome = self
                .store
                .with_job_mut(&batch_id, |job| {
                    let priority = job.priority;
                    let job_created_at = job.created_at;
                    let resumable = !job.status.is_terminal();
                    let Some(unit) = job.unit_mut(&unit_id) else {
                        return None;
                    };
                    if unit.status.is_terminal() {
                        return None;
                    }
                    if resumable && unit.reset_for_requeue() {
                        let position = unit.position;
                        if job.status == BatchStatus::Paused {
                            // Stays pending; resume re-enqueues it.
                            return None;
                        }
                        Some(Ok(ReadyEntry {
                            batch_id: batch_id.clone(),
                            unit_id: unit_id.clone(),
                            priority,
                            job_created_at,
                            submit_seq: seq,
                            position,
                        }))
                    } else {
                        unit.fail("lease expired with retry budget exhausted");
                        job.recount();
                        let unit = job.unit(&unit_id).cloned()?;
                        Some(Err(ProgressEvent::video_failed(job, &unit)))
                    }
                })
                .await
                .ok()
                .flatten();

            match outcome {
                Some(Ok(entry)) => self.queue.push(entry),
                Some(Err(event)) => {
                    metrics::record_unit_terminal("failed");
                    self.publish(&event).await;
                    self.finalize(&batch_id).await;
                }
                None => {}
            }
        }
    }

    fn try_begin_job(&self, batch_id: &BatchJobId) -> bool {
        let mut inflight = self.inflight_per_job.lock().unwrap();
        let count = inflight.entry(batch_id.clone()).or_insert(0);
        if *count >= self.config.per_job_limit {
            false
        } else {
            *count += 1;
            true
        }
    }

    fn end_job(&self, batch_id: &BatchJobId) {
        let mut inflight = self.inflight_per_job.lock().unwrap();
        if let Some(count) = inflight.get_mut(batch_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inflight.remove(batch_id);
            }
        }
    }

    async fn publish(&self, event: &ProgressEvent) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!(error = %e, "Failed to publish progress event");
        }
    }
}

/// Build ready-queue entries for every pending unit of a job.
fn pending_entries(job: &BatchJob, seq: u64) -> Vec<ReadyEntry> {
    job.units
        .iter()
        .filter(|u| u.status == UnitStatus::Pending)
        .map(|unit| entry_for(job, unit, seq))
        .collect()
}

fn entry_for(job: &BatchJob, unit: &VideoUnit, seq: u64) -> ReadyEntry {
    ReadyEntry {
        batch_id: job.id.clone(),
        unit_id: unit.id.clone(),
        priority: job.priority,
        job_created_at: job.created_at,
        submit_seq: seq,
        position: unit.position,
    }
}
