//! Common test utilities

use async_trait::async_trait;
use reelforge::config::Config;
use reelforge::encoder::{ComposeRequest, Encoder, EncodingError, MediaInfo};
use reelforge::posts::{AccountRef, PostContent, PublishError, Publisher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

/// Offline configuration rooted in `dir`
pub fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("data");
    config.storage.backup_dir = dir.path().join("backups");
    config.jobs.tick_ms = 20;
    config
}

/// Writes a placeholder file instead of running ffmpeg
#[derive(Default)]
pub struct FakeEncoder {
    pub calls: AtomicUsize,
    pub last_image_count: AtomicUsize,
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn compose_from_images(&self, request: &ComposeRequest) -> Result<PathBuf, EncodingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_image_count
            .store(request.images.len(), Ordering::SeqCst);
        tokio::fs::write(&request.output, b"fake mp4").await?;
        Ok(request.output.clone())
    }

    async fn probe(&self, _path: &Path) -> Result<MediaInfo, EncodingError> {
        Ok(MediaInfo {
            duration_secs: 1.0,
            width: 1080,
            height: 1920,
            format: "mp4".to_string(),
        })
    }
}

/// Publisher that fails the first `failures` calls, then records successes
pub struct RecordingPublisher {
    platform: String,
    failures: Mutex<u32>,
    published: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    pub fn new(platform: &str) -> Self {
        Self::flaky(platform, 0)
    }

    pub fn flaky(platform: &str, failures: u32) -> Self {
        Self {
            platform: platform.to_string(),
            failures: Mutex::new(failures),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Account ids published to, in order
    #[allow(dead_code)]
    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn publish(
        &self,
        account: &AccountRef,
        _content: &PostContent,
    ) -> Result<Option<String>, PublishError> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(PublishError::Other("platform unavailable".to_string()));
            }
        }
        self.published
            .lock()
            .unwrap()
            .push(account.account_id.clone());
        Ok(Some(format!(
            "https://{}.test/p/{}",
            self.platform, account.account_id
        )))
    }
}

/// A valid script as a language model would return it
pub fn script_completion() -> String {
    r##"Here you go:
```json
{
  "title": "Three coffee hacks",
  "hook": "Your coffee is lying to you",
  "sections": [
    {"heading": "Grind", "narration": "Grind right before brewing.", "duration_secs": 20},
    {"heading": "Water", "narration": "Use water just off the boil.", "duration_secs": 20}
  ],
  "call_to_action": "Follow for more",
  "hashtags": ["coffee", "#barista"]
}
```"##
        .to_string()
}
