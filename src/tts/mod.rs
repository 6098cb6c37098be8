//! Speech synthesis for job narration
//!
//! Remote and command-line TTS engines are [`Provider`]s; the chain's local
//! stage produces a silent track of the target duration so narration never
//! blocks a render.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::llm::check_status;
use crate::provider::{LocalProvider, Provider, ProviderError};

/// Operation name used for metrics and resilience statistics
pub const OP_TTS: &str = "tts";

/// Sample rate of generated silence
const SILENCE_SAMPLE_RATE: u32 = 16_000;

/// Text to speak
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Length of the silent fallback track
    #[serde(skip)]
    pub duration_secs: u32,
}

/// Encoded audio held in memory
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub bytes: Bytes,
    /// File extension without the dot
    pub extension: String,
}

// ============================================================================
// HTTP engine
// ============================================================================

/// POSTs `{text, voice}` as JSON and expects audio bytes back
pub struct HttpTtsProvider {
    name: String,
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpTtsProvider {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(ProviderError::NotConfigured("tts url".to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: "tts:http".to_string(),
            client,
            url,
            api_key,
        })
    }

    /// Override the provider name reported in statistics
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

fn audio_extension(content_type: Option<&str>) -> &'static str {
    match content_type.map(|c| c.split(';').next().unwrap_or(c).trim()) {
        Some("audio/wav" | "audio/x-wav" | "audio/wave") => "wav",
        Some("audio/ogg") => "ogg",
        _ => "mp3",
    }
}

#[async_trait]
impl Provider<SpeechRequest, SpeechAudio> for HttpTtsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: &SpeechRequest) -> Result<SpeechAudio, ProviderError> {
        let mut request = self.client.post(&self.url).json(input);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = check_status(request.send().await?).await?;
        let extension = audio_extension(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::malformed("empty audio"));
        }

        Ok(SpeechAudio {
            bytes,
            extension: extension.to_string(),
        })
    }
}

// ============================================================================
// Command-line engine
// ============================================================================

/// Runs a local engine (e.g. `espeak-ng --stdin --stdout`): text on stdin, WAV on stdout
pub struct CommandTtsProvider {
    program: String,
    args: Vec<String>,
}

impl CommandTtsProvider {
    /// Parse a whitespace-separated command line
    pub fn from_command_line(command: &str) -> Result<Self, ProviderError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ProviderError::NotConfigured("tts command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl Provider<SpeechRequest, SpeechAudio> for CommandTtsProvider {
    fn name(&self) -> &str {
        "tts:command"
    }

    async fn invoke(&self, input: &SpeechRequest) -> Result<SpeechAudio, ProviderError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.text.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::other(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                crate::utils::truncate_text(stderr.trim(), 200)
            )));
        }
        if output.stdout.is_empty() {
            return Err(ProviderError::malformed("engine produced no audio"));
        }

        Ok(SpeechAudio {
            bytes: Bytes::from(output.stdout),
            extension: "wav".to_string(),
        })
    }
}

// ============================================================================
// Silent fallback
// ============================================================================

/// Local stage: a silent mono WAV of the requested length
#[derive(Debug, Clone, Default)]
pub struct SilentAudio;

impl SilentAudio {
    pub fn new() -> Self {
        Self
    }
}

/// 16-bit PCM mono WAV of `duration_secs` seconds of silence
pub fn silent_wav(duration_secs: u32) -> Vec<u8> {
    let samples = SILENCE_SAMPLE_RATE * duration_secs.max(1);
    let data_len = samples * 2;
    let byte_rate = SILENCE_SAMPLE_RATE * 2;

    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&SILENCE_SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.resize(44 + data_len as usize, 0);
    wav
}

#[async_trait]
impl LocalProvider<SpeechRequest, SpeechAudio> for SilentAudio {
    fn name(&self) -> &str {
        "silence"
    }

    async fn generate(&self, input: &SpeechRequest) -> Result<SpeechAudio, ProviderError> {
        Ok(self.minimal(input))
    }

    fn minimal(&self, input: &SpeechRequest) -> SpeechAudio {
        SpeechAudio {
            bytes: Bytes::from(silent_wav(input.duration_secs)),
            extension: "wav".to_string(),
        }
    }
}
