//! The four-stage video pipeline
//!
//! ```text
//! resolve media (10→30) → narration (50) → encode (60→90) → store (100)
//! ```
//!
//! Media and narration fall back internally and never fail the job. An
//! encoder or storage failure does.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::{JobStage, VideoJobRequest};
use crate::encoder::{ComposeRequest, Encoder, EncodingError, Resolution};
use crate::media::{ImageAsset, MediaQuery};
use crate::provider::ProviderChain;
use crate::storage::{BlobStore, PersistenceError};
use crate::tts::{SpeechAudio, SpeechRequest};
use crate::utils::slugify;

/// Stock images requested per job
const STOCK_IMAGE_COUNT: usize = 5;

/// Terminal pipeline failure; its message becomes the job's `error`
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Storage(#[from] PersistenceError),

    #[error("Work directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

/// Receives stage/progress updates from a running pipeline
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn advance(&self, stage: JobStage, progress: u8);

    /// A stage was answered by a fallback
    async fn note_fallback(&self, label: String);
}

/// URLs of a finished job
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub video_url: String,
    pub thumbnail_url: Option<String>,
}

/// Collaborators shared by every job
pub struct JobPipeline {
    media: Arc<ProviderChain<MediaQuery, Vec<ImageAsset>>>,
    tts: Arc<ProviderChain<SpeechRequest, SpeechAudio>>,
    encoder: Arc<dyn Encoder>,
    blobs: Arc<dyn BlobStore>,
    work_dir: PathBuf,
    default_resolution: Resolution,
}

impl JobPipeline {
    pub fn new(
        media: Arc<ProviderChain<MediaQuery, Vec<ImageAsset>>>,
        tts: Arc<ProviderChain<SpeechRequest, SpeechAudio>>,
        encoder: Arc<dyn Encoder>,
        blobs: Arc<dyn BlobStore>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            media,
            tts,
            encoder,
            blobs,
            work_dir: work_dir.into(),
            default_resolution: Resolution::default(),
        }
    }

    pub fn with_default_resolution(mut self, resolution: Resolution) -> Self {
        self.default_resolution = resolution;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run every stage for one job; the job's work directory is removed afterwards
    pub async fn run(
        &self,
        job_id: &str,
        request: &VideoJobRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let job_dir = self.work_dir.join(job_id);
        tokio::fs::create_dir_all(&job_dir).await?;

        let result = self.run_stages(&job_dir, request, progress, cancel).await;

        if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
            tracing::debug!(job_id = %job_id, error = %e, "Could not remove work directory");
        }
        result
    }

    async fn run_stages(
        &self,
        job_dir: &Path,
        request: &VideoJobRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let resolution = request
            .resolution
            .as_deref()
            .and_then(Resolution::parse)
            .unwrap_or(self.default_resolution);

        // 1. media
        progress.advance(JobStage::ResolvingMedia, 10).await;
        let images = self.resolve_media(job_dir, request, resolution, progress).await?;
        progress.advance(JobStage::ResolvingMedia, 30).await;
        ensure_live(cancel)?;

        // 2. narration
        let audio = self.resolve_audio(job_dir, request, progress).await?;
        progress.advance(JobStage::Narration, 50).await;
        ensure_live(cancel)?;

        // 3. encode
        progress.advance(JobStage::Encoding, 60).await;
        let mut style = request.style.clone();
        style.resolution = resolution;
        let compose = ComposeRequest {
            images: images.clone(),
            audio,
            style,
            duration_secs: request.target_duration_secs,
            output: job_dir.join(format!("{}.mp4", slugify(&request.title, 48))),
        };
        let video = tokio::select! {
            encoded = self.encoder.compose_from_images(&compose) => encoded?,
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };
        progress.advance(JobStage::Encoding, 90).await;

        // 4. store
        progress.advance(JobStage::Storing, 90).await;
        let video_url = self.blobs.upload_video(&video).await?;
        let thumbnail_url = match images.first() {
            Some(first) => Some(self.blobs.upload_image(first).await?),
            None => None,
        };

        Ok(PipelineOutput {
            video_url,
            thumbnail_url,
        })
    }

    async fn resolve_media(
        &self,
        job_dir: &Path,
        request: &VideoJobRequest,
        resolution: Resolution,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let mut supplied = Vec::with_capacity(request.images.len());
        for path in &request.images {
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() => supplied.push(path.clone()),
                _ => tracing::warn!(path = %path.display(), "Supplied image is not accessible"),
            }
        }
        if !supplied.is_empty() {
            return Ok(supplied);
        }

        let query = MediaQuery {
            query: request
                .media_query
                .clone()
                .unwrap_or_else(|| request.title.clone()),
            count: STOCK_IMAGE_COUNT,
            resolution,
        };
        let result = self.media.invoke(&query).await;
        if result.used_local {
            progress
                .note_fallback(format!("media:{}", result.used_provider))
                .await;
        }

        let mut paths = Vec::with_capacity(result.value.len());
        for (index, asset) in result.value.iter().enumerate() {
            let path = job_dir.join(format!("image_{index:02}.{}", asset.extension));
            tokio::fs::write(&path, &asset.bytes).await?;
            paths.push(path);
        }
        Ok(paths)
    }

    async fn resolve_audio(
        &self,
        job_dir: &Path,
        request: &VideoJobRequest,
        progress: &dyn ProgressSink,
    ) -> Result<Option<PathBuf>, PipelineError> {
        if let Some(audio) = &request.audio {
            if tokio::fs::metadata(audio).await.is_ok_and(|m| m.is_file()) {
                return Ok(Some(audio.clone()));
            }
            tracing::warn!(path = %audio.display(), "Supplied audio is not accessible");
        }

        let Some(text) = request.narration() else {
            return Ok(None);
        };

        progress.advance(JobStage::Narration, 30).await;
        let speech = SpeechRequest {
            text: text.to_string(),
            voice: request.voice.clone(),
            duration_secs: request.target_duration_secs,
        };
        let result = self.tts.invoke(&speech).await;
        if result.used_local {
            progress
                .note_fallback(format!("tts:{}", result.used_provider))
                .await;
        }

        let path = job_dir.join(format!("narration.{}", result.value.extension));
        tokio::fs::write(&path, &result.value.bytes).await?;
        Ok(Some(path))
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}
