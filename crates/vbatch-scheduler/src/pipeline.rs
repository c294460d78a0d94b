//! Per-unit pipeline execution.
//!
//! [`run_unit`] drives one leased video unit through its remaining enabled
//! stages: execute under timeout, commit the transition through the job
//! store, emit the matching progress event, retry transient failures with
//! exponential backoff. Commits are guarded by the unit's lease and by its
//! status, so a cancellation or lease takeover that lands mid-stage makes
//! the in-flight result a discard, never a write.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use vbatch_models::{
    BatchJobId, BatchSettings, ProgressEvent, Stage, StageFailure, VideoRef, VideoUnitId,
};
use vbatch_queue::{LeaseMap, ProgressPublisher};

use crate::executor::StageExecutor;
use crate::metrics;
use crate::retry::BackoffPolicy;
use crate::store::JobStore;

/// Everything a worker needs to run units.
pub(crate) struct PipelineCtx {
    pub store: Arc<JobStore>,
    pub executor: Arc<dyn StageExecutor>,
    pub publisher: Arc<dyn ProgressPublisher>,
    pub leases: Arc<LeaseMap>,
    pub backoff: BackoffPolicy,
    pub stage_timeout: std::time::Duration,
}

/// Result of committing a stage outcome through the store.
enum Commit {
    /// Transition applied; events to publish, and whether the unit is done.
    Applied { events: Vec<ProgressEvent>, terminal: bool },
    /// Unit went terminal (or lost its lease) meanwhile; stop silently.
    Discarded,
}

/// Decision after a transient failure.
enum RetryDecision {
    Retry { attempt: u32, event: ProgressEvent },
    Exhausted { event: ProgressEvent },
    Discarded,
}

struct UnitSnapshot {
    video: VideoRef,
    settings: BatchSettings,
    sequence: Vec<Stage>,
    start_idx: usize,
}

/// Run one unit through its remaining stages. The caller holds the unit's
/// lease under `holder` for the whole call.
pub(crate) async fn run_unit(
    ctx: &PipelineCtx,
    batch_id: &BatchJobId,
    unit_id: &VideoUnitId,
    holder: &str,
) {
    let Some(snapshot) = snapshot_unit(ctx, batch_id, unit_id).await else {
        warn!(batch_id = %batch_id, unit_id = %unit_id, "Unit vanished before pipeline start");
        return;
    };
    let UnitSnapshot {
        video,
        settings,
        sequence,
        start_idx,
    } = snapshot;
    let total = sequence.len();

    let mut idx = start_idx;
    while idx < total {
        let stage = sequence[idx];
        let next = sequence.get(idx + 1).copied();

        loop {
            // Keep ownership fresh across long stages and backoff sleeps;
            // a lost lease means the unit was reclaimed by another worker.
            if !ctx.leases.renew(unit_id, holder) {
                warn!(
                    batch_id = %batch_id,
                    unit_id = %unit_id,
                    stage = %stage,
                    "Lease lost, abandoning unit"
                );
                return;
            }

            let started = Instant::now();
            let outcome = match timeout(
                ctx.stage_timeout,
                ctx.executor.execute(stage, &video, &settings),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(StageFailure::transient(format!(
                    "stage {stage} timed out after {}s",
                    ctx.stage_timeout.as_secs()
                ))),
            };
            metrics::record_stage_latency(stage, started.elapsed().as_secs_f64());

            match outcome {
                Ok(result) => {
                    match commit_success(ctx, batch_id, unit_id, holder, stage, result, idx, total, next)
                        .await
                    {
                        Commit::Discarded => return,
                        Commit::Applied { events, terminal } => {
                            publish_all(ctx, events).await;
                            if terminal {
                                info!(batch_id = %batch_id, unit_id = %unit_id, "Unit completed");
                                metrics::record_unit_terminal("completed");
                                return;
                            }
                            idx += 1;
                            break;
                        }
                    }
                }
                Err(failure) if failure.is_retryable() => {
                    match commit_transient(ctx, batch_id, unit_id, holder, stage, &failure).await {
                        RetryDecision::Discarded => return,
                        RetryDecision::Retry { attempt, event } => {
                            publish_all(ctx, vec![event]).await;
                            metrics::record_retry(stage);
                            let delay = ctx.backoff.delay_for_attempt(attempt);
                            debug!(
                                unit_id = %unit_id,
                                stage = %stage,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Retrying stage after transient failure"
                            );
                            sleep(delay).await;
                        }
                        RetryDecision::Exhausted { event } => {
                            publish_all(ctx, vec![event]).await;
                            warn!(
                                batch_id = %batch_id,
                                unit_id = %unit_id,
                                stage = %stage,
                                "Unit failed: retry budget exhausted"
                            );
                            metrics::record_unit_terminal("failed");
                            return;
                        }
                    }
                }
                Err(failure) => {
                    match commit_failure(ctx, batch_id, unit_id, holder, stage, &failure).await {
                        Commit::Discarded => return,
                        Commit::Applied { events, .. } => {
                            publish_all(ctx, events).await;
                            warn!(
                                batch_id = %batch_id,
                                unit_id = %unit_id,
                                stage = %stage,
                                error = %failure.message,
                                "Unit failed permanently"
                            );
                            metrics::record_unit_terminal("failed");
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn snapshot_unit(
    ctx: &PipelineCtx,
    batch_id: &BatchJobId,
    unit_id: &VideoUnitId,
) -> Option<UnitSnapshot> {
    ctx.store
        .with_job(batch_id, |job| {
            let unit = job.unit(unit_id)?;
            let sequence = job.settings.stage_sequence();
            // Resume at the recorded stage after a requeue, else from the top.
            let start_idx = unit
                .current_stage
                .and_then(|s| sequence.iter().position(|x| *x == s))
                .unwrap_or(0);
            Some(UnitSnapshot {
                video: unit.video.clone(),
                settings: job.settings.clone(),
                sequence,
                start_idx,
            })
        })
        .await
        .ok()
        .flatten()
}

#[allow(clippy::too_many_arguments)]
async fn commit_success(
    ctx: &PipelineCtx,
    batch_id: &BatchJobId,
    unit_id: &VideoUnitId,
    holder: &str,
    stage: Stage,
    result: serde_json::Value,
    idx: usize,
    total: usize,
    next: Option<Stage>,
) -> Commit {
    let leases = Arc::clone(&ctx.leases);
    ctx.store
        .with_job_mut(batch_id, |job| {
            if !leases.held_by(unit_id, holder) {
                return Commit::Discarded;
            }
            let Some(unit) = job.unit_mut(unit_id) else {
                return Commit::Discarded;
            };
            if unit.status.is_terminal() {
                return Commit::Discarded;
            }

            unit.record_stage_success(stage, result, idx, total, next);
            let terminal = next.is_none();
            if terminal {
                job.recount();
            }
            let unit = job
                .unit(unit_id)
                .cloned()
                .unwrap_or_else(|| unreachable!("unit checked above"));
            let event = if terminal {
                ProgressEvent::video_completed(job, &unit)
            } else {
                ProgressEvent::progress(job, &unit, None)
            };
            Commit::Applied {
                events: vec![event],
                terminal,
            }
        })
        .await
        .unwrap_or(Commit::Discarded)
}

async fn commit_transient(
    ctx: &PipelineCtx,
    batch_id: &BatchJobId,
    unit_id: &VideoUnitId,
    holder: &str,
    stage: Stage,
    failure: &StageFailure,
) -> RetryDecision {
    let leases = Arc::clone(&ctx.leases);
    ctx.store
        .with_job_mut(batch_id, |job| {
            if !leases.held_by(unit_id, holder) {
                return RetryDecision::Discarded;
            }
            let Some(unit) = job.unit_mut(unit_id) else {
                return RetryDecision::Discarded;
            };
            if unit.status.is_terminal() {
                return RetryDecision::Discarded;
            }

            if unit.record_transient_failure(&failure.message) {
                let attempt = unit.retry_count;
                let max = unit.max_retries;
                let unit = unit.clone();
                let event = ProgressEvent::progress(
                    job,
                    &unit,
                    Some(format!(
                        "retrying {stage} (attempt {attempt}/{max}): {}",
                        failure.message
                    )),
                );
                RetryDecision::Retry { attempt, event }
            } else {
                let message = format!(
                    "stage {stage} failed after {} retries: {}",
                    unit.max_retries, failure.message
                );
                unit.fail(message);
                job.recount();
                let unit = job
                    .unit(unit_id)
                    .cloned()
                    .unwrap_or_else(|| unreachable!("unit checked above"));
                RetryDecision::Exhausted {
                    event: ProgressEvent::video_failed(job, &unit),
                }
            }
        })
        .await
        .unwrap_or(RetryDecision::Discarded)
}

async fn commit_failure(
    ctx: &PipelineCtx,
    batch_id: &BatchJobId,
    unit_id: &VideoUnitId,
    holder: &str,
    stage: Stage,
    failure: &StageFailure,
) -> Commit {
    let leases = Arc::clone(&ctx.leases);
    ctx.store
        .with_job_mut(batch_id, |job| {
            if !leases.held_by(unit_id, holder) {
                return Commit::Discarded;
            }
            let Some(unit) = job.unit_mut(unit_id) else {
                return Commit::Discarded;
            };
            if unit.status.is_terminal() {
                return Commit::Discarded;
            }

            unit.fail(format!("stage {stage} failed: {}", failure.message));
            job.recount();
            let unit = job
                .unit(unit_id)
                .cloned()
                .unwrap_or_else(|| unreachable!("unit checked above"));
            Commit::Applied {
                events: vec![ProgressEvent::video_failed(job, &unit)],
                terminal: true,
            }
        })
        .await
        .unwrap_or(Commit::Discarded)
}

async fn publish_all(ctx: &PipelineCtx, events: Vec<ProgressEvent>) {
    for event in events {
        if let Err(e) = ctx.publisher.publish(&event).await {
            warn!(error = %e, "Failed to publish progress event");
        }
    }
}
