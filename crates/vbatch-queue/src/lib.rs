//! In-process scheduling primitives for the batch orchestrator.
//!
//! This crate provides:
//! - A priority-ordered ready queue of video units
//! - Exclusive per-unit leases (at-most-one execution)
//! - Progress event publishing (in-memory broadcast or Redis Pub/Sub)

pub mod error;
pub mod lease;
pub mod progress;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use lease::{Lease, LeaseMap};
pub use progress::{BroadcastPublisher, ProgressPublisher, RedisPublisher};
pub use queue::{ReadyEntry, ReadyQueue};
