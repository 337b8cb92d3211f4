use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Container extensions accepted by the delivery surfaces.
pub const ALLOWED_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

pub const DEFAULT_CAPTION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_HOSTED_MODEL: &str = "gpt-4o";
pub const DEFAULT_LOCAL_MODEL: &str = "llama-3-8b-instruct";
pub const DEFAULT_LOCAL_API_BASE: &str = "http://localhost:8080/v1";

/// How frames are picked out of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Minimum video time between two sampled frames, in seconds.
    pub frame_interval: f64,
    pub max_frames: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            frame_interval: 1.0,
            max_frames: 30,
        }
    }
}

impl SamplingConfig {
    pub fn new(frame_interval: f64, max_frames: usize) -> Self {
        Self {
            frame_interval,
            max_frames,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.frame_interval.is_finite() || self.frame_interval <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "frame interval must be a positive number of seconds, got {}",
                self.frame_interval
            )));
        }
        if self.max_frames == 0 {
            return Err(PipelineError::InvalidConfig(
                "max frames must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CaptionSettings {
    pub model: String,
    /// OpenAI-compatible endpoint; `None` means the hosted OpenAI API.
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_CAPTION_MODEL.to_owned(),
            api_base: None,
            api_key: None,
            max_tokens: 60,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisBackend {
    /// Chat completion against a hosted API.
    Hosted,
    /// Raw text completion against a locally running OpenAI-compatible server.
    Local,
}

#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub backend: SynthesisBackend,
    pub model: String,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub stop: Vec<String>,
    pub timeout: Duration,
}

impl SynthesisSettings {
    pub fn new(backend: SynthesisBackend) -> Self {
        let (model, api_base) = match backend {
            SynthesisBackend::Hosted => (DEFAULT_HOSTED_MODEL, None),
            SynthesisBackend::Local => (DEFAULT_LOCAL_MODEL, Some(DEFAULT_LOCAL_API_BASE)),
        };
        Self {
            backend,
            model: model.to_owned(),
            api_base: api_base.map(str::to_owned),
            api_key: None,
            max_tokens: 512,
            stop: vec!["</s>".to_owned(), "User:".to_owned()],
            timeout: Duration::from_secs(300),
        }
    }
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self::new(SynthesisBackend::Hosted)
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: IpAddr,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

/// Whether the file name carries one of [`ALLOWED_EXTENSIONS`].
pub fn is_allowed_video(path: impl AsRef<Path>) -> bool {
    allowed_extension(path).is_some()
}

/// The lowercased extension of `path` when it is an accepted video container.
pub fn allowed_extension(path: impl AsRef<Path>) -> Option<String> {
    let extension = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(extension)
}
