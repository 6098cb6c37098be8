//! Configuration management for reelforge
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files. Secrets (API keys, tokens) are only ever read from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Content generation (timeouts, cache TTLs)
    pub content: ContentConfig,

    /// Video job scheduler
    pub jobs: JobsConfig,

    /// Social post scheduler
    pub posts: PostsConfig,

    /// Health probing
    pub resilience: ResilienceConfig,

    /// Snapshot and artifact locations
    pub storage: StorageConfig,

    /// External provider endpoints
    pub providers: ProvidersConfig,

    /// Health/metrics HTTP server
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Content generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Per-attempt timeout for script generation
    pub script_timeout_secs: u64,

    /// Per-attempt timeout for social copy generation
    pub social_timeout_secs: u64,

    /// Per-attempt timeout for topic suggestions
    pub topics_timeout_secs: u64,

    /// Cache TTL for generated scripts
    pub script_ttl_secs: u64,

    /// Cache TTL for generated social copy
    pub social_ttl_secs: u64,

    /// Cache TTL for topic suggestions
    pub topics_ttl_secs: u64,

    /// Disable to always hit the providers
    pub cache_enabled: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            script_timeout_secs: 10,
            social_timeout_secs: 5,
            topics_timeout_secs: 5,
            script_ttl_secs: 3600,
            social_ttl_secs: 3600,
            topics_ttl_secs: 1800,
            cache_enabled: true,
        }
    }
}

/// Video job scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Maximum pipelines running at once
    pub max_concurrent_workers: usize,

    /// Scheduling loop period in milliseconds
    pub tick_ms: u64,

    /// Default output resolution (WIDTHxHEIGHT)
    pub default_resolution: String,

    /// Per-attempt timeout for TTS providers
    pub tts_timeout_secs: u64,

    /// Finished jobs kept in memory and in the jobs snapshot
    pub retain_finished: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 2,
            tick_ms: 1000,
            default_resolution: "1080x1920".to_string(),
            tts_timeout_secs: 30,
            retain_finished: 200,
        }
    }
}

/// Social post scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostsConfig {
    /// Review loop period in seconds
    pub tick_secs: u64,

    /// Default attempt budget per post
    pub max_retries: u32,

    /// Publications per minute allowed per platform
    pub rate_limit_per_minute: u32,
}

impl Default for PostsConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            max_retries: 3,
            rate_limit_per_minute: 30,
        }
    }
}

/// Health probing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Hours between automatic probe batches
    pub interval_hours: u64,

    /// Records kept per service
    pub history_limit: usize,

    /// Mean critical success rate above which the system is healthy
    pub healthy_threshold: f64,

    /// Default per-probe timeout
    pub probe_timeout_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            interval_hours: 6,
            history_limit: 100,
            healthy_threshold: 0.7,
            probe_timeout_secs: 10,
        }
    }
}

/// Snapshot and artifact storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for snapshots and artifacts
    pub data_dir: PathBuf,

    /// Directory receiving backups
    pub backup_dir: PathBuf,

    /// Base URL under which stored artifacts are served
    pub public_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            backup_dir: PathBuf::from("./backups"),
            public_base_url: "http://127.0.0.1:8088/media".to_string(),
        }
    }
}

impl StorageConfig {
    /// Scheduled post snapshot file
    pub fn posts_snapshot(&self) -> PathBuf {
        self.data_dir.join("scheduled_posts.json")
    }

    /// Job mirror file
    pub fn jobs_snapshot(&self) -> PathBuf {
        self.data_dir.join("jobs.json")
    }

    /// Resilience statistics file
    pub fn resilience_stats(&self) -> PathBuf {
        self.data_dir.join("resilience_stats.json")
    }

    /// Soak-test statistics file
    pub fn soak_stats(&self) -> PathBuf {
        self.data_dir.join("soak_stats.json")
    }

    /// Scratch directory for pipeline intermediates
    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("work")
    }

    /// Directory holding published artifacts
    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("media")
    }
}

/// External provider endpoints
///
/// Every provider is optional; an unconfigured provider is simply left out
/// of its chain and the local fallback covers for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Ollama endpoint (e.g. http://localhost:11434)
    pub ollama_url: Option<String>,

    /// Ollama model name
    pub ollama_model: String,

    /// OpenAI-compatible endpoint
    pub openai_base_url: Option<String>,

    /// OpenAI-compatible model name
    pub openai_model: String,

    /// OpenAI-compatible API key (env only)
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,

    /// Cloud TTS endpoint
    pub tts_url: Option<String>,

    /// Cloud TTS API key (env only)
    #[serde(skip_serializing)]
    pub tts_api_key: Option<String>,

    /// Offline TTS command (e.g. espeak-ng)
    pub tts_command: Option<String>,

    /// Stock media API key (env only)
    #[serde(skip_serializing)]
    pub pexels_api_key: Option<String>,

    /// Encoder binary
    pub ffmpeg_path: String,

    /// Webhook used to publish social posts
    pub webhook_url: Option<String>,

    /// Bearer token for the webhook (env only)
    #[serde(skip_serializing)]
    pub webhook_token: Option<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            ollama_url: None,
            ollama_model: "llama3.2".to_string(),
            openai_base_url: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_api_key: None,
            tts_url: None,
            tts_api_key: None,
            tts_command: None,
            pexels_api_key: None,
            ffmpeg_path: "ffmpeg".to_string(),
            webhook_url: None,
            webhook_token: None,
        }
    }
}

/// Health/metrics server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8088".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a file, then overlay secrets from the environment
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.apply_secrets();
        Ok(config)
    }

    fn apply_env(&mut self) {
        let content = &mut self.content;
        content.script_timeout_secs =
            env_or("REELFORGE_SCRIPT_TIMEOUT", content.script_timeout_secs);
        content.social_timeout_secs =
            env_or("REELFORGE_SOCIAL_TIMEOUT", content.social_timeout_secs);
        content.topics_timeout_secs =
            env_or("REELFORGE_TOPICS_TIMEOUT", content.topics_timeout_secs);
        content.script_ttl_secs = env_or("REELFORGE_SCRIPT_TTL", content.script_ttl_secs);
        content.social_ttl_secs = env_or("REELFORGE_SOCIAL_TTL", content.social_ttl_secs);
        content.topics_ttl_secs = env_or("REELFORGE_TOPICS_TTL", content.topics_ttl_secs);
        content.cache_enabled = env_or("REELFORGE_CACHE_ENABLED", content.cache_enabled);

        let jobs = &mut self.jobs;
        jobs.max_concurrent_workers = env_or("REELFORGE_MAX_WORKERS", jobs.max_concurrent_workers);
        jobs.tick_ms = env_or("REELFORGE_JOB_TICK_MS", jobs.tick_ms);
        jobs.retain_finished = env_or("REELFORGE_RETAIN_FINISHED_JOBS", jobs.retain_finished);
        if let Some(resolution) = env_opt("REELFORGE_RESOLUTION") {
            jobs.default_resolution = resolution;
        }

        let posts = &mut self.posts;
        posts.tick_secs = env_or("REELFORGE_POST_TICK_SECS", posts.tick_secs);
        posts.max_retries = env_or("REELFORGE_POST_MAX_RETRIES", posts.max_retries);
        posts.rate_limit_per_minute =
            env_or("REELFORGE_POST_RATE_LIMIT", posts.rate_limit_per_minute);

        let resilience = &mut self.resilience;
        resilience.interval_hours =
            env_or("REELFORGE_RESILIENCE_INTERVAL_HOURS", resilience.interval_hours);
        resilience.history_limit =
            env_or("REELFORGE_RESILIENCE_HISTORY", resilience.history_limit);
        resilience.healthy_threshold =
            env_or("REELFORGE_HEALTHY_THRESHOLD", resilience.healthy_threshold);

        if let Some(dir) = env_opt("REELFORGE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_opt("REELFORGE_BACKUP_DIR") {
            self.storage.backup_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_opt("REELFORGE_PUBLIC_URL") {
            self.storage.public_base_url = url;
        }

        let providers = &mut self.providers;
        providers.ollama_url = env_opt("OLLAMA_URL").or(providers.ollama_url.take());
        if let Some(model) = env_opt("REELFORGE_OLLAMA_MODEL") {
            providers.ollama_model = model;
        }
        providers.openai_base_url =
            env_opt("OPENAI_BASE_URL").or(providers.openai_base_url.take());
        if let Some(model) = env_opt("REELFORGE_OPENAI_MODEL") {
            providers.openai_model = model;
        }
        providers.tts_url = env_opt("REELFORGE_TTS_URL").or(providers.tts_url.take());
        providers.tts_command = env_opt("REELFORGE_TTS_COMMAND").or(providers.tts_command.take());
        if let Some(path) = env_opt("REELFORGE_FFMPEG") {
            providers.ffmpeg_path = path;
        }
        providers.webhook_url = env_opt("REELFORGE_WEBHOOK_URL").or(providers.webhook_url.take());

        if let Some(bind) = env_opt("REELFORGE_BIND") {
            self.server.bind = bind;
        }
        if let Some(level) = env_opt("REELFORGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env_opt("REELFORGE_LOG_FORMAT") {
            self.logging.format = format;
        }

        self.apply_secrets();
    }

    fn apply_secrets(&mut self) {
        let providers = &mut self.providers;
        providers.openai_api_key = env_opt("OPENAI_API_KEY");
        providers.tts_api_key = env_opt("REELFORGE_TTS_API_KEY");
        providers.pexels_api_key = env_opt("PEXELS_API_KEY");
        providers.webhook_token = env_opt("REELFORGE_WEBHOOK_TOKEN");
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.jobs.max_concurrent_workers == 0 {
            anyhow::bail!("max_concurrent_workers must be greater than 0");
        }

        if self.jobs.tick_ms == 0 || self.posts.tick_secs == 0 {
            anyhow::bail!("scheduler ticks must be greater than 0");
        }

        if self.jobs.retain_finished == 0 {
            anyhow::bail!("jobs.retain_finished must be at least 1");
        }

        if self.posts.max_retries == 0 {
            anyhow::bail!("posts.max_retries must be at least 1");
        }

        if self.posts.rate_limit_per_minute == 0 {
            anyhow::bail!("posts.rate_limit_per_minute must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.resilience.healthy_threshold) {
            anyhow::bail!("resilience.healthy_threshold must be within 0.0..=1.0");
        }

        if self.resilience.history_limit == 0 {
            anyhow::bail!("resilience.history_limit must be greater than 0");
        }

        if crate::encoder::Resolution::parse(&self.jobs.default_resolution).is_none() {
            anyhow::bail!(
                "jobs.default_resolution '{}' is not WIDTHxHEIGHT",
                self.jobs.default_resolution
            );
        }

        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("server.bind '{}' is not a socket address", self.server.bind);
        }

        Ok(())
    }

    /// Scheduling loop period for video jobs
    #[must_use]
    pub fn job_tick(&self) -> Duration {
        Duration::from_millis(self.jobs.tick_ms)
    }

    /// Review loop period for scheduled posts
    #[must_use]
    pub fn post_tick(&self) -> Duration {
        Duration::from_secs(self.posts.tick_secs)
    }

    /// Period between automatic probe batches
    #[must_use]
    pub fn resilience_interval(&self) -> Duration {
        Duration::from_secs(self.resilience.interval_hours * 3600)
    }
}
