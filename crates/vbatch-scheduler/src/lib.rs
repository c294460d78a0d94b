//! Batch scheduling and pipeline execution for the VBatch backend.
//!
//! This crate contains the orchestrator: the priority scheduler and its
//! worker pool, the per-unit stage pipeline with retry/backoff, and the
//! [`BatchService`] control surface that callers use to create, submit,
//! pause, resume, cancel, and observe batch jobs.

pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod simulate;
pub mod store;

pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use executor::StageExecutor;
pub use retry::BackoffPolicy;
pub use scheduler::Scheduler;
pub use service::{BatchService, ProgressStream};
pub use simulate::ScriptedExecutor;
pub use store::JobStore;
