//! Batch processing settings.
//!
//! Settings are chosen once at batch creation and are immutable afterwards.
//! A stage is enabled iff a `StageParams` entry for it is present; unknown
//! or duplicated stages are rejected at validation time rather than
//! surfacing as runtime key errors.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};
use crate::stage::Stage;

/// Default silence threshold in dBFS.
pub const DEFAULT_SILENCE_THRESHOLD_DB: f32 = -35.0;
/// Default minimum silence span before a cut is considered.
pub const DEFAULT_MIN_SILENCE_MS: u32 = 700;
/// Default highlight detection sensitivity (0.0-1.0).
pub const DEFAULT_HIGHLIGHT_SENSITIVITY: f32 = 0.5;

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Mp4,
    Mov,
    Webm,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Mp4 => "mp4",
            ExportFormat::Mov => "mov",
            ExportFormat::Webm => "webm",
        }
    }
}

/// Output quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportQuality {
    Low,
    #[default]
    Standard,
    High,
}

/// Per-stage parameters, one variant per pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageParams {
    /// Upload validation has no tunables.
    Upload,

    /// Transcription parameters.
    Transcribe {
        /// Model hint passed through to the transcription executor
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },

    /// Silence removal parameters.
    RemoveSilence {
        /// Loudness threshold below which audio counts as silence (dBFS)
        #[serde(default = "default_silence_threshold")]
        threshold_db: f32,
        /// Minimum silence duration before a cut (milliseconds)
        #[serde(default = "default_min_silence_ms")]
        min_silence_ms: u32,
    },

    /// Highlight detection parameters.
    DetectHighlights {
        /// Detection sensitivity, 0.0 (strict) to 1.0 (eager)
        #[serde(default = "default_sensitivity")]
        sensitivity: f32,
    },

    /// Export parameters.
    Export {
        #[serde(default)]
        format: ExportFormat,
        #[serde(default)]
        quality: ExportQuality,
    },
}

fn default_silence_threshold() -> f32 {
    DEFAULT_SILENCE_THRESHOLD_DB
}
fn default_min_silence_ms() -> u32 {
    DEFAULT_MIN_SILENCE_MS
}
fn default_sensitivity() -> f32 {
    DEFAULT_HIGHLIGHT_SENSITIVITY
}

impl StageParams {
    /// The pipeline stage these parameters belong to.
    pub fn stage(&self) -> Stage {
        match self {
            StageParams::Upload => Stage::Uploading,
            StageParams::Transcribe { .. } => Stage::Transcribing,
            StageParams::RemoveSilence { .. } => Stage::RemovingSilence,
            StageParams::DetectHighlights { .. } => Stage::DetectingHighlights,
            StageParams::Export { .. } => Stage::Exporting,
        }
    }
}

/// Immutable processing settings shared by every video in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchSettings {
    /// Enabled stages with their parameters; normalized to global order.
    pub stages: Vec<StageParams>,

    /// Transcription language (BCP-47 tag)
    #[serde(default = "default_language")]
    pub language: String,

    /// Custom keywords boosting highlight detection
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            stages: vec![
                StageParams::Upload,
                StageParams::Transcribe { model: None },
                StageParams::Export {
                    format: ExportFormat::default(),
                    quality: ExportQuality::default(),
                },
            ],
            language: default_language(),
            keywords: Vec::new(),
        }
    }
}

impl BatchSettings {
    /// Settings with a single enabled stage. Mostly useful in tests.
    pub fn single_stage(params: StageParams) -> Self {
        Self {
            stages: vec![params],
            language: default_language(),
            keywords: Vec::new(),
        }
    }

    /// Validate and normalize: rejects an empty pipeline and duplicated
    /// stages, and sorts `stages` into the global stage order.
    pub fn validate(&mut self) -> ValidationResult<()> {
        if self.stages.is_empty() {
            return Err(ValidationError::EmptyPipeline);
        }

        self.stages.sort_by_key(|p| p.stage().index());
        for pair in self.stages.windows(2) {
            if pair[0].stage() == pair[1].stage() {
                return Err(ValidationError::DuplicateStage(pair[0].stage()));
            }
        }

        Ok(())
    }

    /// Enabled stages in the fixed global order.
    pub fn stage_sequence(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = self.stages.iter().map(|p| p.stage()).collect();
        stages.sort_by_key(|s| s.index());
        stages
    }

    /// Check if a stage is enabled.
    pub fn is_enabled(&self, stage: Stage) -> bool {
        self.stages.iter().any(|p| p.stage() == stage)
    }

    /// Parameters for an enabled stage.
    pub fn params_for(&self, stage: Stage) -> Option<&StageParams> {
        self.stages.iter().find(|p| p.stage() == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_normalization() {
        let mut settings = BatchSettings {
            stages: vec![
                StageParams::Export {
                    format: ExportFormat::Mp4,
                    quality: ExportQuality::High,
                },
                StageParams::Upload,
                StageParams::Transcribe { model: None },
            ],
            language: "en".into(),
            keywords: vec![],
        };

        settings.validate().unwrap();
        assert_eq!(
            settings.stage_sequence(),
            vec![Stage::Uploading, Stage::Transcribing, Stage::Exporting]
        );
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let mut settings = BatchSettings {
            stages: vec![],
            language: "en".into(),
            keywords: vec![],
        };
        assert_eq!(settings.validate(), Err(ValidationError::EmptyPipeline));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let mut settings = BatchSettings {
            stages: vec![StageParams::Upload, StageParams::Upload],
            language: "en".into(),
            keywords: vec![],
        };
        assert_eq!(
            settings.validate(),
            Err(ValidationError::DuplicateStage(Stage::Uploading))
        );
    }

    #[test]
    fn test_unknown_stage_rejected_by_serde() {
        let result: Result<StageParams, _> =
            serde_json::from_str(r#"{"stage": "colorize"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_stage_params_defaults() {
        let params: StageParams =
            serde_json::from_str(r#"{"stage": "remove_silence"}"#).unwrap();
        match params {
            StageParams::RemoveSilence {
                threshold_db,
                min_silence_ms,
            } => {
                assert_eq!(threshold_db, DEFAULT_SILENCE_THRESHOLD_DB);
                assert_eq!(min_silence_ms, DEFAULT_MIN_SILENCE_MS);
            }
            other => panic!("unexpected params: {other:?}"),
        }
    }
}
