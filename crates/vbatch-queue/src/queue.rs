//! Priority-ordered ready queue of video units.
//!
//! Selection policy: (priority DESC, job created_at ASC, submit sequence
//! ASC, position ASC). Higher-priority jobs preempt the queue position for
//! the next free worker slot; within a job, units are offered strictly in
//! the order the user supplied them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use vbatch_models::{BatchJobId, VideoUnitId};

/// One schedulable unit.
#[derive(Debug, Clone)]
pub struct ReadyEntry {
    /// Batch the unit belongs to
    pub batch_id: BatchJobId,
    /// Unit to execute
    pub unit_id: VideoUnitId,
    /// Batch priority (0-10, higher first)
    pub priority: u8,
    /// Batch creation time (FIFO tie-break)
    pub job_created_at: DateTime<Utc>,
    /// Monotonic submission sequence (stable tie-break)
    pub submit_seq: u64,
    /// Unit position within the batch
    pub position: u32,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    // BinaryHeap pops the greatest entry, so "greater" means
    // "schedule earlier".
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.job_created_at.cmp(&self.job_created_at))
            .then_with(|| other.submit_seq.cmp(&self.submit_seq))
            .then_with(|| other.position.cmp(&self.position))
    }
}

struct QueueInner {
    heap: BinaryHeap<ReadyEntry>,
    closed: bool,
}

/// Shared ready queue consumed by the worker pool.
pub struct ReadyQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl ReadyQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a unit. Entries pushed after close are dropped.
    pub fn push(&self, entry: ReadyEntry) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.heap.push(entry);
        }
        self.notify.notify_one();
    }

    /// Take the best entry without waiting.
    pub fn try_pop(&self) -> Option<ReadyEntry> {
        self.inner.lock().unwrap().heap.pop()
    }

    /// Wait for the best entry. Returns `None` once the queue is closed
    /// and drained.
    pub async fn pop(&self) -> Option<ReadyEntry> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(entry) = inner.heap.pop() {
                    return Some(entry);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Drop every queued entry of one batch (pause/cancel).
    /// Returns how many entries were removed.
    pub fn remove_batch(&self, batch_id: &BatchJobId) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.heap.len();
        let kept: BinaryHeap<ReadyEntry> = inner
            .heap
            .drain()
            .filter(|e| &e.batch_id != batch_id)
            .collect();
        inner.heap = kept;
        before - inner.heap.len()
    }

    /// Close the queue and wake all waiters.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.notify.notify_waiters();
        // Wake a waiter that parked between the flag store and notify.
        self.notify.notify_one();
    }

    /// Queued entry count.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(priority: u8, seq: u64, position: u32) -> ReadyEntry {
        ReadyEntry {
            batch_id: BatchJobId::from_string(format!("batch-{seq}")),
            unit_id: VideoUnitId::new(),
            priority,
            job_created_at: Utc::now(),
            submit_seq: seq,
            position,
        }
    }

    #[test]
    fn test_priority_ordering() {
        let queue = ReadyQueue::new();
        queue.push(entry(3, 0, 0)); // job B, submitted first
        queue.push(entry(8, 1, 0)); // job A, higher priority

        assert_eq!(queue.try_pop().unwrap().priority, 8);
        assert_eq!(queue.try_pop().unwrap().priority, 3);
    }

    #[test]
    fn test_fifo_tie_break_on_equal_priority() {
        let queue = ReadyQueue::new();
        let older = Utc::now() - chrono::Duration::seconds(5);

        let mut a = entry(5, 0, 0);
        a.job_created_at = older;
        let b = entry(5, 1, 0);
        queue.push(b);
        queue.push(a);

        assert_eq!(queue.try_pop().unwrap().submit_seq, 0);
        assert_eq!(queue.try_pop().unwrap().submit_seq, 1);
    }

    #[test]
    fn test_position_order_within_job() {
        let queue = ReadyQueue::new();
        let batch_id = BatchJobId::new();
        let created = Utc::now();
        for position in [2u32, 0, 1] {
            queue.push(ReadyEntry {
                batch_id: batch_id.clone(),
                unit_id: VideoUnitId::new(),
                priority: 5,
                job_created_at: created,
                submit_seq: 7,
                position,
            });
        }

        let order: Vec<u32> = std::iter::from_fn(|| queue.try_pop())
            .map(|e| e.position)
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_remove_batch() {
        let queue = ReadyQueue::new();
        let keep = entry(5, 0, 0);
        let drop_batch = entry(5, 1, 0);
        let drop_id = drop_batch.batch_id.clone();
        queue.push(keep);
        queue.push(drop_batch.clone());
        queue.push(ReadyEntry {
            position: 1,
            unit_id: VideoUnitId::new(),
            ..drop_batch
        });

        assert_eq!(queue.remove_batch(&drop_id), 2);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(ReadyQueue::new());
        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.pop().await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push(entry(1, 0, 0));

        let popped = waiter.await.unwrap();
        assert!(popped.is_some());
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let queue = std::sync::Arc::new(ReadyQueue::new());
        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.pop().await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.close();

        assert!(waiter.await.unwrap().is_none());
    }
}
