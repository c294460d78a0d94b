//! Progress event publishing.
//!
//! The scheduler emits [`ProgressEvent`]s through a [`ProgressPublisher`];
//! the notification layer consumes them. Two implementations are provided:
//! an in-memory broadcast channel (default, also backs the subscribe API)
//! and Redis Pub/Sub for multi-process deployments.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use vbatch_models::{BatchJobId, ProgressEvent};

use crate::error::QueueResult;

/// Default broadcast channel capacity.
pub const BROADCAST_CAPACITY: usize = 256;

/// Consumer of scheduler progress events.
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    /// Publish one event. Failures are the publisher's to report; the
    /// scheduler logs and moves on rather than failing the unit.
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()>;
}

/// In-memory broadcast publisher.
///
/// Events for every batch share one channel; subscribers filter by
/// `batch_job_id`. Lagging subscribers lose the oldest events, matching
/// pub/sub semantics.
pub struct BroadcastPublisher {
    sender: tokio::sync::broadcast::Sender<ProgressEvent>,
}

impl BroadcastPublisher {
    /// Create a publisher with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(BROADCAST_CAPACITY)
    }

    /// Create a publisher with an explicit buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all progress events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressPublisher for BroadcastPublisher {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        // A send error only means there are no subscribers right now.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Redis Pub/Sub publisher, one channel per batch.
pub struct RedisPublisher {
    client: redis::Client,
}

impl RedisPublisher {
    /// Create a new Redis publisher.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Channel name for a batch.
    pub fn channel_name(batch_id: &BatchJobId) -> String {
        format!("progress:{}", batch_id)
    }

    /// Subscribe to progress events for one batch.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        batch_id: &BatchJobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = ProgressEvent> + Send>>>
    {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_name(batch_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl ProgressPublisher for RedisPublisher {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.batch_job_id);
        let payload = serde_json::to_string(event)?;

        debug!(channel = %channel, "Publishing progress event");
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use vbatch_models::{BatchJob, BatchSettings, VideoRef};

    fn sample_event() -> ProgressEvent {
        let mut job =
            BatchJob::new("u", "b", None, BatchSettings::default(), 5).unwrap();
        job.add_video(VideoRef::new("vid-1")).unwrap();
        let unit = job.units[0].clone();
        ProgressEvent::video_started(&job, &unit)
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscriber() {
        let publisher = BroadcastPublisher::new();
        let mut rx = publisher.subscribe();

        let event = sample_event();
        publisher.publish(&event).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.batch_job_id, event.batch_job_id);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = BroadcastPublisher::new();
        assert_ok!(publisher.publish(&sample_event()).await);
    }

    #[test]
    fn test_redis_channel_name() {
        let id = BatchJobId::from_string("batch-1");
        assert_eq!(RedisPublisher::channel_name(&id), "progress:batch-1");
    }
}
