//! Video encoder collaborator
//!
//! The job pipeline only depends on the [`Encoder`] trait. [`FfmpegEncoder`]
//! is a thin implementation that shells out to `ffmpeg`/`ffprobe`; encoding
//! failures are never retried here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

// ============================================================================
// Errors
// ============================================================================

/// Failure from the encoder; terminal for the job that hit it
#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("Nothing to encode: {0}")]
    NoInput(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder exited with {}: {stderr}", .status.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    Failed { status: Option<i32>, stderr: String },

    #[error("Could not probe media: {0}")]
    Probe(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Request types
// ============================================================================

/// Output frame size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const VERTICAL_HD: Resolution = Resolution {
        width: 1080,
        height: 1920,
    };

    /// Parse `WIDTHxHEIGHT`; both sides must be non-zero and even
    pub fn parse(value: &str) -> Option<Self> {
        let (w, h) = value.trim().split_once(['x', 'X'])?;
        let width: u32 = w.trim().parse().ok()?;
        let height: u32 = h.trim().parse().ok()?;
        (width > 0 && height > 0 && width % 2 == 0 && height % 2 == 0)
            .then_some(Self { width, height })
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::VERTICAL_HD
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Transition between consecutive images
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    #[default]
    Cut,
    Fade,
}

/// Visual parameters for a slideshow render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeStyle {
    #[serde(default)]
    pub transition: Transition,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub resolution: Resolution,
}

fn default_fps() -> u32 {
    30
}

impl Default for EncodeStyle {
    fn default() -> Self {
        Self {
            transition: Transition::default(),
            fps: default_fps(),
            resolution: Resolution::default(),
        }
    }
}

/// Everything the encoder needs to render one video
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub images: Vec<PathBuf>,
    pub audio: Option<PathBuf>,
    pub style: EncodeStyle,
    pub duration_secs: u32,
    pub output: PathBuf,
}

impl ComposeRequest {
    /// Seconds each image stays on screen
    pub fn seconds_per_image(&self) -> f64 {
        if self.images.is_empty() {
            return 0.0;
        }
        f64::from(self.duration_secs.max(1)) / self.images.len() as f64
    }
}

/// Basic facts about an encoded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

// ============================================================================
// Trait
// ============================================================================

#[async_trait]
pub trait Encoder: Send + Sync {
    /// Render a slideshow of `images` over optional narration; returns the artifact path
    async fn compose_from_images(&self, request: &ComposeRequest) -> Result<PathBuf, EncodingError>;

    async fn probe(&self, path: &Path) -> Result<MediaInfo, EncodingError>;
}

// ============================================================================
// ffmpeg implementation
// ============================================================================

/// Runs the `ffmpeg` binary through the concat demuxer
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegEncoder {
    /// `ffmpeg` is the encoder binary; `ffprobe` is looked up next to it
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        let ffmpeg = ffmpeg.into();
        let ffprobe = ffmpeg.with_file_name("ffprobe");
        Self { ffmpeg, ffprobe }
    }

    /// Concat-demuxer playlist; the last image is repeated so its duration is honoured
    fn playlist(request: &ComposeRequest) -> String {
        let per_image = request.seconds_per_image();
        let mut list = String::new();
        for image in &request.images {
            let escaped = image.to_string_lossy().replace('\'', r"'\''");
            list.push_str(&format!("file '{escaped}'\nduration {per_image:.3}\n"));
        }
        if let Some(last) = request.images.last() {
            let escaped = last.to_string_lossy().replace('\'', r"'\''");
            list.push_str(&format!("file '{escaped}'\n"));
        }
        list
    }

    fn compose_args(request: &ComposeRequest, playlist: &Path) -> Vec<String> {
        let Resolution { width, height } = request.style.resolution;
        let mut filter = format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1,format=yuv420p"
        );
        if request.style.transition == Transition::Fade {
            let fade_out = (f64::from(request.duration_secs) - 0.5).max(0.0);
            filter.push_str(&format!(",fade=t=in:st=0:d=0.5,fade=t=out:st={fade_out:.2}:d=0.5"));
        }

        let mut args: Vec<String> = vec![
            "-y".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            playlist.to_string_lossy().into_owned(),
        ];
        if let Some(audio) = &request.audio {
            args.push("-i".into());
            args.push(audio.to_string_lossy().into_owned());
        }
        args.extend([
            "-vf".into(),
            filter,
            "-r".into(),
            request.style.fps.to_string(),
            "-c:v".into(),
            "libx264".into(),
            "-t".into(),
            request.duration_secs.to_string(),
        ]);
        if request.audio.is_some() {
            args.extend(["-c:a".into(), "aac".into(), "-shortest".into()]);
        }
        args.push(request.output.to_string_lossy().into_owned());
        args
    }

    async fn run(program: &Path, args: &[String]) -> Result<Vec<u8>, EncodingError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EncodingError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // ffmpeg prints the actual cause on the last lines
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let stderr = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
            return Err(EncodingError::Failed {
                status: output.status.code(),
                stderr,
            });
        }
        Ok(output.stdout)
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    format_name: Option<String>,
}

fn parse_probe(stdout: &[u8]) -> Result<MediaInfo, EncodingError> {
    let parsed: ProbeOutput =
        serde_json::from_slice(stdout).map_err(|e| EncodingError::Probe(e.to_string()))?;
    let format = parsed
        .format
        .ok_or_else(|| EncodingError::Probe("no format section".to_string()))?;
    let video = parsed.streams.iter().find(|s| s.width.is_some());

    Ok(MediaInfo {
        duration_secs: format
            .duration
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0),
        width: video.and_then(|s| s.width).unwrap_or(0),
        height: video.and_then(|s| s.height).unwrap_or(0),
        format: format.format_name.unwrap_or_default(),
    })
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn compose_from_images(&self, request: &ComposeRequest) -> Result<PathBuf, EncodingError> {
        if request.images.is_empty() {
            return Err(EncodingError::NoInput("no images".to_string()));
        }

        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let playlist = request.output.with_extension("txt");
        tokio::fs::write(&playlist, Self::playlist(request)).await?;

        let args = Self::compose_args(request, &playlist);
        tracing::debug!(program = %self.ffmpeg.display(), args = ?args, "Running encoder");

        let result = Self::run(&self.ffmpeg, &args).await;
        let _ = tokio::fs::remove_file(&playlist).await;
        result?;

        tracing::info!(
            output = %request.output.display(),
            images = request.images.len(),
            resolution = %request.style.resolution,
            "Video encoded"
        );
        Ok(request.output.clone())
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, EncodingError> {
        let args: Vec<String> = vec![
            "-v".into(),
            "error".into(),
            "-show_entries".into(),
            "format=duration,format_name:stream=width,height".into(),
            "-of".into(),
            "json".into(),
            path.to_string_lossy().into_owned(),
        ];
        let stdout = Self::run(&self.ffprobe, &args).await?;
        parse_probe(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(images: usize, audio: bool) -> ComposeRequest {
        ComposeRequest {
            images: (0..images).map(|i| PathBuf::from(format!("/tmp/img{i}.ppm"))).collect(),
            audio: audio.then(|| PathBuf::from("/tmp/voice.wav")),
            style: EncodeStyle::default(),
            duration_secs: 30,
            output: PathBuf::from("/tmp/out.mp4"),
        }
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!(
            Resolution::parse("1080x1920"),
            Some(Resolution {
                width: 1080,
                height: 1920
            })
        );
        assert_eq!(Resolution::parse(" 720X1280 ").map(|r| r.to_string()), Some("720x1280".into()));
        assert_eq!(Resolution::parse("1080"), None);
        assert_eq!(Resolution::parse("0x100"), None);
        assert_eq!(Resolution::parse("721x1280"), None);
    }

    #[test]
    fn test_playlist_repeats_last_image() {
        let list = FfmpegEncoder::playlist(&request(3, false));
        assert_eq!(list.matches("duration 10.000").count(), 3);
        assert!(list.trim_end().ends_with("file '/tmp/img2.ppm'"));
    }

    #[test]
    fn test_compose_args_with_audio() {
        let args = FfmpegEncoder::compose_args(&request(2, true), Path::new("/tmp/out.txt"));
        assert!(args.contains(&"/tmp/voice.wav".to_string()));
        assert!(args.contains(&"-shortest".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[test]
    fn test_compose_args_fade() {
        let mut req = request(2, false);
        req.style.transition = Transition::Fade;
        let args = FfmpegEncoder::compose_args(&req, Path::new("/tmp/out.txt"));
        let filter = &args[args.iter().position(|a| a == "-vf").unwrap() + 1];
        assert!(filter.contains("fade=t=out:st=29.50"));
        assert!(!args.contains(&"-shortest".to_string()));
    }

    #[test]
    fn test_parse_probe() {
        let json = br#"{"streams":[{},{"width":1080,"height":1920}],
            "format":{"duration":"12.5","format_name":"mov,mp4"}}"#;
        let info = parse_probe(json).unwrap();
        assert_eq!(info.width, 1080);
        assert_eq!(info.duration_secs, 12.5);
        assert_eq!(info.format, "mov,mp4");
    }

    #[tokio::test]
    async fn test_compose_without_images() {
        let err = FfmpegEncoder::default()
            .compose_from_images(&request(0, false))
            .await
            .unwrap_err();
        assert!(matches!(err, EncodingError::NoInput(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut req = request(1, false);
        req.output = dir.path().join("out.mp4");
        let encoder = FfmpegEncoder::new(dir.path().join("no-such-ffmpeg"));
        let err = encoder.compose_from_images(&req).await.unwrap_err();
        assert!(matches!(err, EncodingError::Spawn { .. }));
    }
}
