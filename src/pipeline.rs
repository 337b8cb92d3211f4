use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::caption::{caption_frame, Captioner, CaptionOutcome};
use crate::capture::{FrameSampler, SampledFrame};
use crate::config::SamplingConfig;
use crate::error::PipelineError;
use crate::record::{FrameBatch, FrameRecord};

/// Samples a video and captions every sampled frame, strictly one frame at
/// a time.
#[derive(Clone)]
pub struct Pipeline {
    captioner: Arc<dyn Captioner>,
}

impl Pipeline {
    pub fn new(captioner: Arc<dyn Captioner>) -> Self {
        Self { captioner }
    }

    pub fn captioner(&self) -> &dyn Captioner {
        self.captioner.as_ref()
    }

    /// Checks the captioning model before anything is decoded, then samples
    /// and captions `source`.
    ///
    /// A video that decodes but yields no frames produces an empty batch.
    pub async fn extract_and_describe(
        &self,
        source: &Path,
        config: &SamplingConfig,
        cancel: &CancellationToken,
    ) -> Result<FrameBatch, PipelineError> {
        self.captioner
            .ensure_ready()
            .await
            .map_err(|err| PipelineError::model_unavailable(self.captioner.model(), &err))?;
        config.validate()?;

        let sampler = FrameSampler::open(source, config)?;
        let batch = self.describe_frames(sampler, cancel).await?;
        info!(
            path = %source.display(),
            frames = batch.len(),
            "finished frame extraction"
        );
        Ok(batch)
    }

    /// Captions frames from any source in the order they arrive.
    ///
    /// Cancellation is observed before each frame is pulled; a cancelled run
    /// discards what it has built so far.
    pub async fn describe_frames<I>(
        &self,
        frames: I,
        cancel: &CancellationToken,
    ) -> Result<FrameBatch, PipelineError>
    where
        I: IntoIterator<Item = Result<SampledFrame, PipelineError>>,
    {
        let mut frames = frames.into_iter();
        let mut batch = FrameBatch::with_capacity(frames.size_hint().0);
        loop {
            if cancel.is_cancelled() {
                info!(processed = batch.len(), "frame processing cancelled");
                return Err(PipelineError::Cancelled);
            }
            let Some(frame) = frames.next() else {
                break;
            };
            let SampledFrame { timestamp, image } = frame?;

            let outcome = caption_frame(self.captioner.as_ref(), &image).await;
            drop(image);
            if let CaptionOutcome::Failed(cause) = &outcome {
                warn!(timestamp, %cause, "captioning failed, recording sentinel caption");
            }

            let record = FrameRecord::new(timestamp, outcome.into_caption());
            info!(frame = batch.len() + 1, timestamp = record.timestamp(), "captioned frame");
            debug!(caption = record.caption());
            batch.push(record);
        }
        Ok(batch)
    }
}

/// Runs `work` until it finishes or `cancel` fires, whichever comes first.
///
/// Cancellation drops `work` at its current await point, so an in-flight
/// model call is abandoned rather than waited out.
pub async fn until_cancelled<T, F>(cancel: &CancellationToken, work: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    tokio::select! {
        result = work => result,
        () = cancel.cancelled() => Err(PipelineError::Cancelled),
    }
}
