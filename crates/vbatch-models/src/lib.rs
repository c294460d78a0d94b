//! Shared data models for the VBatch backend.
//!
//! This crate provides Serde-serializable types for:
//! - Batch jobs and their per-video units
//! - Pipeline stages and stage parameters
//! - Progress events streamed to clients
//! - Request payloads and validation errors

pub mod batch;
pub mod error;
pub mod events;
pub mod request;
pub mod settings;
pub mod stage;
pub mod unit;

// Re-export common types
pub use batch::{BatchCounters, BatchJob, BatchJobId, BatchStatus};
pub use error::{ValidationError, ValidationResult};
pub use events::{ProgressEvent, ProgressEventType};
pub use request::{AddVideosRequest, CreateBatchRequest, MAX_BATCH_VIDEOS};
pub use settings::{BatchSettings, ExportFormat, ExportQuality, StageParams};
pub use stage::{FailureKind, Stage, StageFailure};
pub use unit::{UnitStatus, VideoRef, VideoUnit, VideoUnitId};
