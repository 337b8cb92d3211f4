use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, CreateCompletionRequestArgs, ImageUrlArgs, Stop,
};
use async_openai::Client;
use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use image::codecs::jpeg;
use image::RgbImage;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::caption::Captioner;
use crate::config::{CaptionSettings, SynthesisBackend, SynthesisSettings};
use crate::narrate::TextGenerator;

const CAPTION_INSTRUCTION: &str = "Describe what is visible in this video frame in one short \
sentence. Mention the main subjects, their actions and the setting. Do not speculate.";

const READINESS_TIMEOUT: Duration = Duration::from_secs(30);
const JPEG_QUALITY: u8 = 90;

fn client(api_base: Option<&str>, api_key: Option<&str>) -> Client<OpenAIConfig> {
    let mut config = OpenAIConfig::new();
    if let Some(api_base) = api_base {
        config = config.with_api_base(api_base);
    }
    if let Some(api_key) = api_key {
        config = config.with_api_key(api_key);
    }
    Client::with_config(config)
}

/// Confirms a model can be reached. The hosted API is asked for the model
/// itself; a custom endpoint only has to answer the model listing, since
/// local servers name their models inconsistently.
async fn probe_model(
    client: &Client<OpenAIConfig>,
    model: &str,
    custom_endpoint: bool,
) -> anyhow::Result<()> {
    if custom_endpoint {
        tokio::time::timeout(READINESS_TIMEOUT, client.models().list())
            .await
            .context("timed out listing models")??;
    } else {
        tokio::time::timeout(READINESS_TIMEOUT, client.models().retrieve(model))
            .await
            .context("timed out retrieving model")??;
    }
    info!(model, "model is available");
    Ok(())
}

/// Encodes a frame as a JPEG data URL accepted by vision chat models.
pub fn frame_data_url(image: &RgbImage) -> anyhow::Result<String> {
    let mut jpeg_data = Vec::new();
    let mut encoder = jpeg::JpegEncoder::new_with_quality(&mut jpeg_data, JPEG_QUALITY);
    encoder
        .encode(
            image,
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .context("failed to encode frame as JPEG")?;
    let base64_frame = BASE64_STANDARD.encode(jpeg_data);
    Ok("data:image/jpeg;base64,".to_owned() + &base64_frame)
}

/// Captions frames with a vision chat model behind an OpenAI-compatible API.
pub struct VisionCaptioner {
    client: Client<OpenAIConfig>,
    settings: CaptionSettings,
    ready: OnceCell<()>,
}

impl VisionCaptioner {
    pub fn new(settings: CaptionSettings) -> Self {
        Self {
            client: client(settings.api_base.as_deref(), settings.api_key.as_deref()),
            settings,
            ready: OnceCell::new(),
        }
    }
}

#[async_trait]
impl Captioner for VisionCaptioner {
    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn ensure_ready(&self) -> anyhow::Result<()> {
        self.ready
            .get_or_try_init(|| {
                probe_model(
                    &self.client,
                    &self.settings.model,
                    self.settings.api_base.is_some(),
                )
            })
            .await?;
        Ok(())
    }

    async fn caption(&self, image: &RgbImage) -> anyhow::Result<String> {
        let frame = frame_data_url(image)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.settings.model)
            .max_tokens(self.settings.max_tokens)
            .messages([ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(vec![
                        ChatCompletionRequestUserMessageContentPart::Text(
                            ChatCompletionRequestMessageContentPartTextArgs::default()
                                .text(CAPTION_INSTRUCTION)
                                .build()?,
                        ),
                        ChatCompletionRequestUserMessageContentPart::ImageUrl(
                            ChatCompletionRequestMessageContentPartImageArgs::default()
                                .image_url(ImageUrlArgs::default().url(frame).build()?)
                                .build()?,
                        ),
                    ]))
                    .build()?,
            )])
            .build()?;

        let response = tokio::time::timeout(
            self.settings.timeout,
            self.client.chat().create(request),
        )
        .await
        .context("caption request timed out")??;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(anyhow::anyhow!("No content in caption response"))
    }
}

/// Chat completion against a hosted API.
pub struct ChatGenerator {
    client: Client<OpenAIConfig>,
    settings: SynthesisSettings,
    ready: OnceCell<()>,
}

impl ChatGenerator {
    pub fn new(settings: SynthesisSettings) -> Self {
        Self {
            client: client(settings.api_base.as_deref(), settings.api_key.as_deref()),
            settings,
            ready: OnceCell::new(),
        }
    }
}

#[async_trait]
impl TextGenerator for ChatGenerator {
    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn ensure_ready(&self) -> anyhow::Result<()> {
        self.ready
            .get_or_try_init(|| {
                probe_model(
                    &self.client,
                    &self.settings.model,
                    self.settings.api_base.is_some(),
                )
            })
            .await?;
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.settings.model)
            .max_tokens(self.settings.max_tokens)
            .stop(Stop::StringArray(self.settings.stop.clone()))
            .messages([ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt.to_owned())
                    .build()?,
            )])
            .build()?;

        debug!(model = %self.settings.model, "sending chat completion");
        let response = tokio::time::timeout(
            self.settings.timeout,
            self.client.chat().create(request),
        )
        .await
        .context("chat completion timed out")??;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(anyhow::anyhow!("No content in chat completion response"))
    }
}

/// Plain text completion against a locally served model.
pub struct CompletionGenerator {
    client: Client<OpenAIConfig>,
    settings: SynthesisSettings,
    ready: OnceCell<()>,
}

impl CompletionGenerator {
    pub fn new(settings: SynthesisSettings) -> Self {
        Self {
            client: client(settings.api_base.as_deref(), settings.api_key.as_deref()),
            settings,
            ready: OnceCell::new(),
        }
    }
}

#[async_trait]
impl TextGenerator for CompletionGenerator {
    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn ensure_ready(&self) -> anyhow::Result<()> {
        self.ready
            .get_or_try_init(|| probe_model(&self.client, &self.settings.model, true))
            .await?;
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let request = CreateCompletionRequestArgs::default()
            .model(&self.settings.model)
            .prompt(prompt)
            .max_tokens(self.settings.max_tokens)
            .stop(Stop::StringArray(self.settings.stop.clone()))
            .build()?;

        debug!(model = %self.settings.model, "sending text completion");
        let response = tokio::time::timeout(
            self.settings.timeout,
            self.client.completions().create(request),
        )
        .await
        .context("text completion timed out")??;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .ok_or(anyhow::anyhow!("No choices in completion response"))
    }
}

pub fn build_generator(settings: &SynthesisSettings) -> Arc<dyn TextGenerator> {
    match settings.backend {
        SynthesisBackend::Hosted => Arc::new(ChatGenerator::new(settings.clone())),
        SynthesisBackend::Local => Arc::new(CompletionGenerator::new(settings.clone())),
    }
}
