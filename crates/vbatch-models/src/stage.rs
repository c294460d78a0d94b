//! Pipeline stage definitions.
//!
//! Every video moves through the same globally ordered stage sequence,
//! filtered down to the stages enabled in its batch's settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a video's processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Upload validation
    Uploading,
    /// Speech-to-text transcription
    Transcribing,
    /// Silence removal
    RemovingSilence,
    /// Highlight detection
    DetectingHighlights,
    /// Final export/render
    Exporting,
}

impl Stage {
    /// All stages in the fixed global pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Uploading,
        Stage::Transcribing,
        Stage::RemovingSilence,
        Stage::DetectingHighlights,
        Stage::Exporting,
    ];

    /// Position of this stage in the global order.
    pub fn index(&self) -> usize {
        match self {
            Stage::Uploading => 0,
            Stage::Transcribing => 1,
            Stage::RemovingSilence => 2,
            Stage::DetectingHighlights => 3,
            Stage::Exporting => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Uploading => "uploading",
            Stage::Transcribing => "transcribing",
            Stage::RemovingSilence => "removing_silence",
            Stage::DetectingHighlights => "detecting_highlights",
            Stage::Exporting => "exporting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a stage failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retryable (timeout, transient I/O)
    Transient,
    /// Terminal for the unit (corrupt media, unsupported codec)
    Permanent,
}

/// Failure reported by a stage executor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageFailure {
    /// Retry classification
    pub kind: FailureKind,
    /// Human-readable failure description
    pub message: String,
}

impl StageFailure {
    /// Create a transient (retryable) failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    /// Create a permanent (non-retryable) failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    /// Check if the failure is eligible for retry.
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Transient => write!(f, "transient: {}", self.message),
            FailureKind::Permanent => write!(f, "permanent: {}", self.message),
        }
    }
}

impl std::error::Error for StageFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_global_order() {
        for pair in Stage::ALL.windows(2) {
            assert!(pair[0].index() < pair[1].index());
        }
    }

    #[test]
    fn test_stage_serialization() {
        let json = serde_json::to_string(&Stage::RemovingSilence).unwrap();
        assert_eq!(json, "\"removing_silence\"");
    }

    #[test]
    fn test_failure_classification() {
        assert!(StageFailure::transient("timeout").is_retryable());
        assert!(!StageFailure::permanent("corrupt media").is_retryable());
    }
}
