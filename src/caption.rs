use async_trait::async_trait;
use image::RgbImage;

/// Prefix of the caption recorded for a frame the model could not describe.
pub const ERROR_CAPTION_PREFIX: &str = "Error generating description: ";

/// An image-to-text model. Implementations are built once and shared for
/// every frame of a run.
#[async_trait]
pub trait Captioner: Send + Sync {
    fn model(&self) -> &str;

    /// Fails when the model cannot be used at all.
    async fn ensure_ready(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn caption(&self, image: &RgbImage) -> anyhow::Result<String>;
}

/// Result of captioning a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptionOutcome {
    Described(String),
    Failed(String),
}

impl CaptionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, CaptionOutcome::Failed(_))
    }

    /// The caption stored in the frame record; failures become a sentinel.
    pub fn into_caption(self) -> String {
        match self {
            CaptionOutcome::Described(caption) => caption,
            CaptionOutcome::Failed(cause) => format!("{ERROR_CAPTION_PREFIX}{cause}"),
        }
    }
}

pub async fn caption_frame(captioner: &dyn Captioner, image: &RgbImage) -> CaptionOutcome {
    match captioner.caption(image).await {
        Ok(caption) if caption.trim().is_empty() => {
            CaptionOutcome::Failed("model returned an empty caption".to_owned())
        }
        Ok(caption) => CaptionOutcome::Described(caption.trim().to_owned()),
        Err(err) => CaptionOutcome::Failed(format!("{err:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(anyhow::Result<&'static str>);

    #[async_trait]
    impl Captioner for Fixed {
        fn model(&self) -> &str {
            "fixed"
        }

        async fn caption(&self, _image: &RgbImage) -> anyhow::Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(err) => Err(anyhow::anyhow!("{err}")),
            }
        }
    }

    #[tokio::test]
    async fn successful_caption_is_trimmed() {
        let outcome = caption_frame(&Fixed(Ok("  a dog on a beach \n")), &RgbImage::new(2, 2)).await;
        assert_eq!(outcome, CaptionOutcome::Described("a dog on a beach".to_owned()));
    }

    #[tokio::test]
    async fn failure_becomes_sentinel_caption() {
        let outcome = caption_frame(
            &Fixed(Err(anyhow::anyhow!("out of memory"))),
            &RgbImage::new(2, 2),
        )
        .await;
        assert!(outcome.is_failed());
        assert_eq!(
            outcome.into_caption(),
            "Error generating description: out of memory"
        );
    }

    #[tokio::test]
    async fn blank_caption_counts_as_failure() {
        let outcome = caption_frame(&Fixed(Ok("   ")), &RgbImage::new(2, 2)).await;
        assert!(outcome.is_failed());
    }
}
