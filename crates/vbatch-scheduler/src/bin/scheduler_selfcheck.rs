//! End-to-end scheduler self-check binary.
//!
//! Runs a simulated batch through the full scheduler (priority queue,
//! worker pool, retry/backoff, progress events) with a scripted stage
//! executor, and prints the final batch snapshot. Useful for smoke-testing
//! a deployment's configuration without real media work.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vbatch_models::{BatchSettings, CreateBatchRequest, Stage, StageFailure, VideoRef};
use vbatch_scheduler::{BatchService, SchedulerConfig, ScriptedExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vbatch=info".parse().context("bad log directive")?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting scheduler self-check");

    let mut config = SchedulerConfig::from_env();
    // Keep the self-check fast regardless of deployed retry settings.
    config.retry_base_delay = Duration::from_millis(20);

    let executor = Arc::new(ScriptedExecutor::new().with_latency(Duration::from_millis(10)));
    // One flaky transcription and one corrupt video exercise both retry paths.
    executor.fail_once("video-2", Stage::Transcribing, StageFailure::transient("simulated timeout"));
    executor.fail_once("video-3", Stage::Uploading, StageFailure::permanent("simulated corrupt media"));

    let service = BatchService::new(config, executor);
    service.start();

    let job = service
        .create_batch(
            "selfcheck",
            CreateBatchRequest {
                name: "scheduler self-check".into(),
                description: None,
                settings: BatchSettings::default(),
                priority: 5,
                videos: (1..=4)
                    .map(|i| VideoRef::new(format!("video-{i}")).with_duration(60.0))
                    .collect(),
            },
        )
        .await
        .context("create batch")?;

    let mut events = service.subscribe(&job.id);
    service.submit(&job.id).await.context("submit batch")?;

    while let Some(event) = events.next().await {
        info!(
            event = event.event_type.as_str(),
            video_id = event.video_id.as_ref().map(|v| v.as_str()).unwrap_or("-"),
            progress = event.progress,
            "Progress event"
        );
        if event.event_type == vbatch_models::ProgressEventType::BatchCompleted {
            break;
        }
    }

    let snapshot = service.batch_status(&job.id).await.context("batch status")?;
    info!(
        status = %snapshot.status,
        completed = snapshot.counters.completed_videos,
        failed = snapshot.counters.failed_videos,
        "Self-check finished"
    );

    for unit in &snapshot.units {
        info!(
            video = %unit.video.id,
            status = %unit.status,
            retries = unit.retry_count,
            error = unit.error_message.as_deref().unwrap_or("-"),
            "Unit result"
        );
    }

    service.shutdown().await;
    anyhow::ensure!(
        snapshot.status == vbatch_models::BatchStatus::Completed,
        "expected batch to complete, got {}",
        snapshot.status
    );
    Ok(())
}
