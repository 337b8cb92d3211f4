//! Describe short videos in prose: sample frames with FFmpeg, caption each
//! one with a vision model, then have a language model narrate the sequence.

pub mod ai;
pub mod caption;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod narrate;
pub mod pipeline;
pub mod prompt;
pub mod record;
pub mod server;

pub use caption::{Captioner, CaptionOutcome};
pub use capture::{FrameSampler, SampledFrame};
pub use config::SamplingConfig;
pub use error::PipelineError;
pub use narrate::{Synthesizer, TextGenerator, NO_DATA_DESCRIPTION};
pub use pipeline::Pipeline;
pub use record::{FrameBatch, FrameRecord};
