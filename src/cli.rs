use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    CaptionSettings, SamplingConfig, ServerSettings, SynthesisBackend, SynthesisSettings,
    DEFAULT_CAPTION_MODEL,
};
use crate::error::PipelineError;

#[derive(Parser)]
#[command(name = "vidnarrate")]
#[command(version, about = "Describe videos by captioning sampled frames", long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Describe a single video file
    Describe(DescribeArgs),
    /// Serve the upload endpoint over HTTP
    Serve(ServeArgs),
}

#[derive(Args)]
pub struct DescribeArgs {
    pub video_path: PathBuf,
    /// Write the description to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub sampling: SamplingArgs,
    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0", env = "VIDNARRATE_HOST")]
    pub host: IpAddr,
    #[arg(long, default_value_t = 8080, env = "VIDNARRATE_PORT")]
    pub port: u16,
    /// Where uploads are kept while they are processed
    #[arg(long, default_value = "uploads", env = "VIDNARRATE_UPLOAD_DIR")]
    pub upload_dir: PathBuf,
    #[arg(long, default_value_t = 100, env = "VIDNARRATE_MAX_UPLOAD_MB")]
    pub max_upload_mb: usize,
    #[command(flatten)]
    pub sampling: SamplingArgs,
    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Args, Clone)]
pub struct SamplingArgs {
    /// Maximum number of frames to caption
    #[arg(short = 'f', long = "frames", default_value_t = 30)]
    pub max_frames: usize,
    /// Seconds of video between sampled frames
    #[arg(short, long, default_value_t = 1.0)]
    pub interval: f64,
}

#[derive(Args, Clone)]
pub struct ModelArgs {
    #[arg(long, default_value = DEFAULT_CAPTION_MODEL, env = "VIDNARRATE_CAPTION_MODEL")]
    pub caption_model: String,
    /// OpenAI-compatible endpoint for captioning (hosted API when unset)
    #[arg(long, env = "VIDNARRATE_CAPTION_API_BASE")]
    pub caption_api_base: Option<String>,
    #[arg(
        long,
        value_enum,
        default_value_t = SynthesisBackend::Hosted,
        env = "VIDNARRATE_SYNTHESIS_BACKEND"
    )]
    pub synthesis_backend: SynthesisBackend,
    /// Defaults depend on the backend
    #[arg(long, env = "VIDNARRATE_SYNTHESIS_MODEL")]
    pub synthesis_model: Option<String>,
    #[arg(long, env = "VIDNARRATE_SYNTHESIS_API_BASE")]
    pub synthesis_api_base: Option<String>,
    /// Output token limit for the description
    #[arg(long, default_value_t = 512)]
    pub max_tokens: u32,
    #[arg(long, default_value_t = 300)]
    pub timeout_secs: u64,
}

impl SamplingArgs {
    pub fn config(&self) -> SamplingConfig {
        SamplingConfig::new(self.interval, self.max_frames)
    }

    /// The sampling config, rejected up front if a run could never use it.
    pub fn validated_config(&self) -> Result<SamplingConfig, PipelineError> {
        let config = self.config();
        config.validate()?;
        Ok(config)
    }
}

impl ModelArgs {
    pub fn caption_settings(&self) -> CaptionSettings {
        CaptionSettings {
            model: self.caption_model.clone(),
            api_base: self.caption_api_base.clone(),
            ..CaptionSettings::default()
        }
    }

    pub fn synthesis_settings(&self) -> SynthesisSettings {
        let mut settings = SynthesisSettings::new(self.synthesis_backend);
        if let Some(model) = &self.synthesis_model {
            settings.model = model.clone();
        }
        if let Some(api_base) = &self.synthesis_api_base {
            settings.api_base = Some(api_base.clone());
        }
        settings.max_tokens = self.max_tokens;
        settings.timeout = Duration::from_secs(self.timeout_secs);
        settings
    }
}

impl ServeArgs {
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            host: self.host,
            port: self.port,
            upload_dir: self.upload_dir.clone(),
            max_upload_bytes: self.max_upload_mb * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_defaults_match_sampling_defaults() {
        let cli = Cli::parse_from(["vidnarrate", "describe", "clip.mp4"]);
        let Command::Describe(args) = cli.command else {
            panic!("expected describe");
        };
        assert_eq!(args.sampling.config(), SamplingConfig::default());
        assert!(args.output.is_none());
        assert_eq!(args.models.synthesis_settings().backend, SynthesisBackend::Hosted);
    }

    #[test]
    fn short_flags_set_frames_interval_and_output() {
        let cli = Cli::parse_from([
            "vidnarrate", "describe", "clip.mp4", "-f", "15", "-i", "2.0", "-o", "out.txt", "-v",
        ]);
        assert!(cli.verbose);
        let Command::Describe(args) = cli.command else {
            panic!("expected describe");
        };
        assert_eq!(args.sampling.config(), SamplingConfig::new(2.0, 15));
        assert_eq!(args.output, Some(PathBuf::from("out.txt")));
    }

    #[test]
    fn serve_rejects_unusable_sampling_flags() {
        for flag in ["--frames=0", "--interval=0", "--interval=-1.5"] {
            let cli = Cli::parse_from(["vidnarrate", "serve", flag]);
            let Command::Serve(args) = cli.command else {
                panic!("expected serve");
            };
            assert!(
                matches!(
                    args.sampling.validated_config(),
                    Err(PipelineError::InvalidConfig(_))
                ),
                "{flag} accepted"
            );
        }
    }

    #[test]
    fn local_backend_keeps_its_endpoint_unless_overridden() {
        let cli = Cli::parse_from([
            "vidnarrate",
            "serve",
            "--synthesis-backend",
            "local",
            "--synthesis-model",
            "mistral",
            "--max-upload-mb",
            "10",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let settings = args.models.synthesis_settings();
        assert_eq!(settings.backend, SynthesisBackend::Local);
        assert_eq!(settings.model, "mistral");
        assert_eq!(
            settings.api_base.as_deref(),
            Some(crate::config::DEFAULT_LOCAL_API_BASE)
        );
        assert_eq!(args.server_settings().max_upload_bytes, 10 * 1024 * 1024);
    }
}
