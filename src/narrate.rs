use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::prompt::build_prompt;
use crate::record::FrameBatch;

/// Returned for an empty batch without consulting a model.
pub const NO_DATA_DESCRIPTION: &str = "No video data provided for analysis.";

/// A text-generation model, hosted or local.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model(&self) -> &str;

    async fn ensure_ready(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// One non-streaming completion of `prompt`.
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Turns a batch of frame captions into a single description.
#[derive(Clone)]
pub struct Synthesizer {
    generator: Arc<dyn TextGenerator>,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub fn model(&self) -> &str {
        self.generator.model()
    }

    pub async fn ensure_ready(&self) -> Result<(), PipelineError> {
        self.generator
            .ensure_ready()
            .await
            .map_err(|err| PipelineError::model_unavailable(self.generator.model(), &err))
    }

    pub async fn synthesize(&self, batch: &FrameBatch) -> Result<String, PipelineError> {
        if batch.is_empty() {
            return Ok(NO_DATA_DESCRIPTION.to_owned());
        }

        let prompt =
            build_prompt(batch).map_err(|err| PipelineError::SynthesisFailed(format!("{err:#}")))?;
        debug!(prompt_len = prompt.len(), "built synthesis prompt");
        info!(
            model = self.generator.model(),
            frames = batch.len(),
            "generating video description"
        );

        let output = self
            .generator
            .generate(&prompt)
            .await
            .map_err(|err| PipelineError::SynthesisFailed(format!("{err:#}")))?;
        let description = output.trim();
        if description.is_empty() {
            return Err(PipelineError::SynthesisFailed(
                "model returned an empty description".to_owned(),
            ));
        }
        Ok(description.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::prompt::parse_frame_document;
    use crate::record::FrameRecord;

    struct RecordingGenerator {
        reply: anyhow::Result<&'static str>,
        calls: AtomicUsize,
        last_prompt: Mutex<Option<String>>,
    }

    impl RecordingGenerator {
        fn replying(reply: anyhow::Result<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
                last_prompt: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for RecordingGenerator {
        fn model(&self) -> &str {
            "recording"
        }

        async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = Some(prompt.to_owned());
            match &self.reply {
                Ok(text) => Ok(text.to_string()),
                Err(err) => Err(anyhow::anyhow!("{err}")),
            }
        }
    }

    fn batch() -> FrameBatch {
        [
            FrameRecord::new(0.0, "a street at night"),
            FrameRecord::new(1.0, "a bus pulls up"),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn empty_batch_returns_sentinel_without_calling_model() {
        let generator = RecordingGenerator::replying(Ok("unused"));
        let synthesizer = Synthesizer::new(generator.clone());
        let description = synthesizer.synthesize(&FrameBatch::default()).await.unwrap();
        assert_eq!(description, NO_DATA_DESCRIPTION);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn output_is_trimmed_and_prompt_carries_the_batch() {
        let generator = RecordingGenerator::replying(Ok("\n  A bus stops on a dark street.  \n"));
        let synthesizer = Synthesizer::new(generator.clone());
        let description = synthesizer.synthesize(&batch()).await.unwrap();

        assert_eq!(description, "A bus stops on a dark street.");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        let prompt = generator.last_prompt.lock().unwrap().clone().unwrap();
        assert_eq!(parse_frame_document(&prompt).unwrap(), batch());
    }

    #[tokio::test]
    async fn model_error_is_synthesis_failure() {
        let generator = RecordingGenerator::replying(Err(anyhow::anyhow!("503 upstream")));
        let result = Synthesizer::new(generator.clone()).synthesize(&batch()).await;
        match result {
            Err(PipelineError::SynthesisFailed(reason)) => assert!(reason.contains("503")),
            other => panic!("expected SynthesisFailed, got {other:?}"),
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_output_is_synthesis_failure() {
        let generator = RecordingGenerator::replying(Ok("   \n"));
        let result = Synthesizer::new(generator).synthesize(&batch()).await;
        assert!(matches!(result, Err(PipelineError::SynthesisFailed(_))));
    }
}
