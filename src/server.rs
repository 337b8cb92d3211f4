use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::config::{allowed_extension, SamplingConfig, ServerSettings};
use crate::error::PipelineError;
use crate::narrate::Synthesizer;
use crate::pipeline::Pipeline;

const UPLOAD_FIELD: &str = "video";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No video file provided")]
    MissingFile,
    #[error("No file selected")]
    EmptyFilename,
    #[error("Invalid file type. Please upload a video file.")]
    InvalidType,
    #[error("Error processing video: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Error processing video: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error processing video: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Error processing video: worker stopped unexpectedly: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Shared by all requests. Runs are serialized on `run_lock` because the
/// model handles are shared.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    synthesizer: Arc<Synthesizer>,
    sampling: SamplingConfig,
    upload_dir: PathBuf,
    run_lock: Arc<Mutex<()>>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        pipeline: Pipeline,
        synthesizer: Synthesizer,
        sampling: SamplingConfig,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            synthesizer: Arc::new(synthesizer),
            sampling,
            upload_dir,
            run_lock: Arc::new(Mutex::new(())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResponse {
    fn success(description: String, frame_count: usize) -> Self {
        Self {
            success: true,
            description: Some(description),
            frame_count: Some(frame_count),
            error: None,
        }
    }

    fn failure(error: &UploadError) -> Self {
        Self {
            success: false,
            description: None,
            frame_count: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(upload_video))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(settings: ServerSettings, state: AppState) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&settings.upload_dir).await?;
    let listener = tokio::net::TcpListener::bind((settings.host, settings.port)).await?;
    info!("Video description server listening on http://{}", listener.local_addr()?);

    let shutdown = state.shutdown_token();
    axum::serve(listener, router(state, settings.max_upload_bytes))
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested, cancelling in-flight runs");
            }
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        message: "Video to Text service is running",
    })
}

/// Always answers 200; failures are reported in the payload.
async fn upload_video(State(state): State<AppState>, multipart: Multipart) -> Json<UploadResponse> {
    match process_upload(&state, multipart).await {
        Ok((description, frame_count)) => Json(UploadResponse::success(description, frame_count)),
        Err(err) => {
            error!(error = %err, "upload failed");
            Json(UploadResponse::failure(&err))
        }
    }
}

async fn process_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<(String, usize), UploadError> {
    while let Some(field) = multipart.next_field().await? {
        // A part without a filename is a plain form value, not a file.
        if field.name() != Some(UPLOAD_FIELD) || field.file_name().is_none() {
            continue;
        }
        let upload = save_upload(&state.upload_dir, field).await?;
        return describe_upload(state, upload).await;
    }
    Err(UploadError::MissingFile)
}

/// Streams the field into a temp file that is removed when dropped, so the
/// upload disappears whichever way the request ends.
async fn save_upload(upload_dir: &Path, mut field: Field<'_>) -> Result<NamedTempFile, UploadError> {
    let file_name = field.file_name().unwrap_or_default().to_owned();
    if file_name.is_empty() {
        return Err(UploadError::EmptyFilename);
    }
    let extension = allowed_extension(&file_name).ok_or(UploadError::InvalidType)?;

    let upload = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&format!(".{extension}"))
        .tempfile_in(upload_dir)?;
    let mut file = tokio::fs::File::from_std(upload.reopen()?);
    let mut size = 0;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len();
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    info!(file_name = %file_name, size, path = %upload.path().display(), "received upload");
    Ok(upload)
}

async fn describe_upload(
    state: &AppState,
    upload: NamedTempFile,
) -> Result<(String, usize), UploadError> {
    let _run = state.run_lock.lock().await;
    state.synthesizer.ensure_ready().await?;

    let pipeline = state.pipeline.clone();
    let sampling = state.sampling.clone();
    let path = upload.path().to_path_buf();
    let cancel = state.shutdown.child_token();
    let runtime = tokio::runtime::Handle::current();
    // FFmpeg decoding blocks, so the run gets its own thread.
    let batch = tokio::task::spawn_blocking(move || {
        runtime.block_on(pipeline.extract_and_describe(&path, &sampling, &cancel))
    })
    .await??;

    let description = state.synthesizer.synthesize(&batch).await?;
    Ok((description, batch.len()))
}
