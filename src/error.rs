use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures that end a pipeline run.
///
/// Per-frame captioning failures never show up here: they are folded into
/// the record as a sentinel caption (see [`crate::caption::CaptionOutcome`]).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("video source unavailable ({}): {reason}", path.display())]
    SourceUnavailable { path: PathBuf, reason: String },
    #[error("model `{model}` unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },
    #[error("narrative synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("invalid sampling configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to decode video: {0}")]
    Decode(String),
    #[error("processing interrupted")]
    Cancelled,
}

impl PipelineError {
    pub(crate) fn source_unavailable(path: &Path, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn model_unavailable(model: &str, reason: &anyhow::Error) -> Self {
        Self::ModelUnavailable {
            model: model.to_owned(),
            reason: format!("{reason:#}"),
        }
    }
}
