//! Job records, requests and events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::JobError;
use crate::encoder::{EncodeStyle, Resolution};
use crate::error::ValidationError;
use crate::storage::Record;

/// Longest video a job may request
pub const MAX_DURATION_SECS: u32 = 600;

// ============================================================================
// Status and stage
// ============================================================================

/// Lifecycle of a job: `queued -> processing -> {completed, failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a job is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Waiting,
    ResolvingMedia,
    Narration,
    Encoding,
    Storing,
    Done,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Waiting => "waiting",
            JobStage::ResolvingMedia => "resolving_media",
            JobStage::Narration => "narration",
            JobStage::Encoding => "encoding",
            JobStage::Storing => "storing",
            JobStage::Done => "done",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job
// ============================================================================

/// One video-composition request tracked through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub title: String,
    pub stage: JobStage,
    pub status: JobStatus,
    /// 0..=100, never decreases
    pub progress: u8,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error: Option<String>,
    /// Stages that were answered by a fallback (e.g. `media:placeholder`)
    #[serde(default)]
    pub fallbacks: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            stage: JobStage::Waiting,
            status: JobStatus::Queued,
            progress: 0,
            video_url: None,
            thumbnail_url: None,
            error: None,
            fallbacks: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    fn transition(&self, to: JobStatus) -> JobError {
        if self.status.is_terminal() {
            JobError::AlreadyTerminal {
                id: self.id.clone(),
                status: self.status,
            }
        } else {
            JobError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            }
        }
    }

    /// `queued -> processing`
    pub fn start(&mut self) -> Result<(), JobError> {
        if self.status != JobStatus::Queued {
            return Err(self.transition(JobStatus::Processing));
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Move to `stage` and raise progress; lower values are ignored.
    ///
    /// Returns whether anything changed. Terminal jobs are never touched.
    pub fn advance(&mut self, stage: JobStage, progress: u8) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let progress = progress.min(100).max(self.progress);
        let changed = progress != self.progress || stage != self.stage;
        self.stage = stage;
        self.progress = progress;
        changed
    }

    /// `processing -> completed` with the stored artifact URLs
    pub fn complete(&mut self, video_url: String, thumbnail_url: Option<String>) -> Result<(), JobError> {
        if self.status != JobStatus::Processing {
            return Err(self.transition(JobStatus::Completed));
        }
        self.advance(JobStage::Done, 100);
        self.status = JobStatus::Completed;
        self.video_url = Some(video_url);
        self.thumbnail_url = thumbnail_url;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// `queued|processing -> failed`; progress stays where it was
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobError> {
        if self.status.is_terminal() {
            return Err(self.transition(JobStatus::Failed));
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Wall-clock time spent processing, once finished
    pub fn duration_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let ended = self.ended_at?;
        Some((ended - started).num_milliseconds() as f64 / 1000.0)
    }
}

impl Record for Job {
    fn id(&self) -> &str {
        &self.id
    }
}

// ============================================================================
// Request
// ============================================================================

fn default_duration() -> u32 {
    30
}

/// Caller input for [`JobScheduler::submit`](super::JobScheduler::submit)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoJobRequest {
    pub title: String,
    /// Narration text; synthesized when no audio is given
    #[serde(default)]
    pub script: Option<String>,
    /// Caller-supplied images, used when they exist on disk
    #[serde(default)]
    pub images: Vec<PathBuf>,
    /// Pre-recorded narration
    #[serde(default)]
    pub audio: Option<PathBuf>,
    #[serde(default)]
    pub style: EncodeStyle,
    /// `WIDTHxHEIGHT`; the scheduler default applies when absent
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default = "default_duration")]
    pub target_duration_secs: u32,
    #[serde(default)]
    pub voice: Option<String>,
    /// Stock-media search terms; the title is used when absent
    #[serde(default)]
    pub media_query: Option<String>,
}

impl VideoJobRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            target_duration_secs: default_duration(),
            ..Default::default()
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_images(mut self, images: Vec<PathBuf>) -> Self {
        self.images = images;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::missing("title"));
        }
        if !(1..=MAX_DURATION_SECS).contains(&self.target_duration_secs) {
            return Err(ValidationError::invalid(
                "target_duration_secs",
                format!("must be between 1 and {MAX_DURATION_SECS}"),
            ));
        }
        if let Some(resolution) = &self.resolution {
            if Resolution::parse(resolution).is_none() {
                return Err(ValidationError::invalid(
                    "resolution",
                    format!("'{resolution}' is not WIDTHxHEIGHT with even sides"),
                ));
            }
        }
        Ok(())
    }

    /// Narration text, if any non-blank script was given
    pub fn narration(&self) -> Option<&str> {
        self.script.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

// ============================================================================
// Events
// ============================================================================

/// Broadcast to [`JobScheduler::subscribe`](super::JobScheduler::subscribe) receivers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Queued { id: String },
    Started { id: String },
    Progress { id: String, stage: JobStage, progress: u8 },
    Completed { id: String, video_url: String },
    Failed { id: String, error: String },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Queued { id }
            | JobEvent::Started { id }
            | JobEvent::Progress { id, .. }
            | JobEvent::Completed { id, .. }
            | JobEvent::Failed { id, .. } => id,
        }
    }
}
