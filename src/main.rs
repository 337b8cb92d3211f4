use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

use vidnarrate::ai::{build_generator, VisionCaptioner};
use vidnarrate::cli::{Cli, Command, DescribeArgs, ModelArgs, ServeArgs};
use vidnarrate::config::is_allowed_video;
use vidnarrate::server::{self, AppState};
use vidnarrate::pipeline::until_cancelled;
use vidnarrate::{capture, Pipeline, Synthesizer};

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,vidnarrate={default_level}")));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .init();
}

/// Builds both model handles and checks them before any frame is decoded.
async fn load_models(models: &ModelArgs) -> anyhow::Result<(Pipeline, Synthesizer)> {
    let pipeline = Pipeline::new(Arc::new(VisionCaptioner::new(models.caption_settings())));
    let synthesizer = Synthesizer::new(build_generator(&models.synthesis_settings()));

    info!(
        caption_model = pipeline.captioner().model(),
        synthesis_model = synthesizer.model(),
        "loading models"
    );
    pipeline
        .captioner()
        .ensure_ready()
        .await
        .with_context(|| format!("caption model `{}` unavailable", pipeline.captioner().model()))?;
    synthesizer.ensure_ready().await?;
    Ok((pipeline, synthesizer))
}

fn check_input(path: &Path) -> anyhow::Result<()> {
    if !path.try_exists()? {
        anyhow::bail!("video file '{}' not found", path.display());
    }
    if !is_allowed_video(path) {
        anyhow::bail!("'{}' is not a supported video file", path.display());
    }
    Ok(())
}

async fn describe(args: DescribeArgs) -> anyhow::Result<()> {
    check_input(&args.video_path)?;
    let sampling = args.sampling.validated_config()?;

    capture::init()?;
    let (pipeline, synthesizer) = load_models(&args.models).await?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupted, aborting");
        interrupt.cancel();
        // A second Ctrl-C exits even if decoding is stuck.
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let batch = until_cancelled(
        &cancel,
        pipeline.extract_and_describe(&args.video_path, &sampling, &cancel),
    )
    .await?;
    if batch.is_empty() {
        anyhow::bail!("no frames were extracted from '{}'", args.video_path.display());
    }
    info!(frames = batch.len(), "extracted frames");

    let description = until_cancelled(&cancel, synthesizer.synthesize(&batch)).await?;

    match args.output {
        Some(output) => {
            tokio::fs::write(&output, &description)
                .await
                .with_context(|| format!("failed to write '{}'", output.display()))?;
            info!(path = %output.display(), "description saved");
        }
        None => println!("{description}"),
    }
    Ok(())
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let sampling = args.sampling.validated_config()?;
    capture::init()?;
    let (pipeline, synthesizer) = load_models(&args.models).await?;
    let settings = args.server_settings();
    let state = AppState::new(
        pipeline,
        synthesizer,
        sampling,
        settings.upload_dir.clone(),
    );
    server::serve(settings, state).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Describe(args) => describe(args).await,
        Command::Serve(args) => serve(args).await,
    }
}
