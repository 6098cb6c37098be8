//! Application context
//!
//! Builds every component from a [`Config`] and owns their background loops.
//! Nothing in the crate reaches for global state: handlers and CLI commands
//! receive an [`AppContext`] (or the pieces they need) explicitly.

use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::config::Config;
use crate::content::ContentOrchestrator;
use crate::encoder::{Encoder, FfmpegEncoder, Resolution};
use crate::error::{Error, Result};
use crate::jobs::{Job, JobPipeline, JobScheduler, JobSchedulerConfig};
use crate::llm::{LlmClient, LlmConfig};
use crate::media::{ImageAsset, MediaQuery, PexelsSource, PlaceholderImages, OP_MEDIA};
use crate::posts::{
    PostScheduler, PostSchedulerConfig, Publisher, PublisherRegistry, WebhookConfig,
    WebhookPublisher,
};
use crate::provider::{AttemptRecorder, Provider, ProviderChain};
use crate::resilience::{FnProbe, HttpProbe, MonitorConfig, Probe, ResilienceMonitor};
use crate::storage::{LocalBlobStore, SnapshotFile, SnapshotRepository};
use crate::tts::{
    CommandTtsProvider, HttpTtsProvider, SilentAudio, SpeechAudio, SpeechRequest, OP_TTS,
};
use crate::utils::retry::RetryConfig;

/// Time running jobs get to finish on shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

const MEDIA_TIMEOUT: Duration = Duration::from_secs(60);
const PEXELS_PROBE_URL: &str = "https://api.pexels.com/v1/curated?per_page=1";

/// Every long-lived component, wired together
pub struct AppContext {
    config: Config,
    cache: Arc<Cache>,
    monitor: Arc<ResilienceMonitor>,
    content: Arc<ContentOrchestrator>,
    jobs: JobScheduler,
    posts: PostScheduler,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Builder for [`AppContext`]; overrides replace the configured collaborators
pub struct AppContextBuilder {
    config: Config,
    encoder: Option<Arc<dyn Encoder>>,
    publishers: Vec<Arc<dyn Publisher>>,
}

impl AppContextBuilder {
    /// Use `encoder` instead of ffmpeg
    pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Register a platform publisher
    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn build(self) -> Result<AppContext> {
        let Self {
            config,
            encoder,
            publishers,
        } = self;
        config
            .validate()
            .map_err(|e| Error::config(e.to_string()))?;

        let cache = Arc::new(Cache::new());
        let monitor = Arc::new(ResilienceMonitor::new(MonitorConfig::from_config(
            &config.resilience,
            config.storage.resilience_stats(),
        )));
        let recorder: Arc<dyn AttemptRecorder> = monitor.clone();
        let probe_timeout = Duration::from_secs(config.resilience.probe_timeout_secs);

        // Content
        let llms = language_models(&config)?;
        for client in &llms {
            let probed = Arc::clone(client);
            monitor.register(
                client.name(),
                Arc::new(FnProbe::new(move || {
                    let client = Arc::clone(&probed);
                    async move {
                        if client.is_available().await {
                            Ok(())
                        } else {
                            Err("endpoint unavailable")
                        }
                    }
                })),
                true,
            );
        }
        let content = Arc::new(ContentOrchestrator::new(
            Arc::clone(&cache),
            config.content.clone(),
            &llms,
            Some(Arc::clone(&recorder)),
        )?);

        // Media and narration
        let pexels = match config.providers.pexels_api_key.as_deref() {
            Some(key) => {
                let source = PexelsSource::new(key)?;
                let probe = HttpProbe::new(PEXELS_PROBE_URL, probe_timeout)?
                    .with_header("Authorization", key);
                monitor.register("pexels", Arc::new(probe), false);
                Some(Arc::new(source) as Arc<dyn Provider<MediaQuery, Vec<ImageAsset>>>)
            }
            None => None,
        };
        let media = ProviderChain::<MediaQuery, Vec<ImageAsset>>::builder(OP_MEDIA)
            .provider_opt(pexels)
            .local(Arc::new(PlaceholderImages::new()))
            .timeout(MEDIA_TIMEOUT)
            .recorder(Arc::clone(&recorder))
            .build()?;

        let tts_timeout = Duration::from_secs(config.jobs.tts_timeout_secs);
        let mut tts = ProviderChain::<SpeechRequest, SpeechAudio>::builder(OP_TTS)
            .local(Arc::new(SilentAudio::new()))
            .timeout(tts_timeout)
            .recorder(Arc::clone(&recorder));
        if let Some(url) = &config.providers.tts_url {
            let provider =
                HttpTtsProvider::new(url, config.providers.tts_api_key.clone(), tts_timeout)?;
            let probe = HttpProbe::new(url, probe_timeout)?.reachable_only();
            monitor.register("tts:http", Arc::new(probe), false);
            tts = tts.provider(Arc::new(provider));
        }
        if let Some(command) = &config.providers.tts_command {
            tts = tts.provider(Arc::new(CommandTtsProvider::from_command_line(command)?));
        }
        let tts = tts.build()?;

        // Encoding and storage
        let encoder: Arc<dyn Encoder> = match encoder {
            Some(encoder) => encoder,
            None => {
                let ffmpeg = config.providers.ffmpeg_path.clone();
                monitor.register("encoder:ffmpeg", Arc::new(command_probe(ffmpeg)), true);
                Arc::new(FfmpegEncoder::new(&config.providers.ffmpeg_path))
            }
        };
        let blobs = Arc::new(
            LocalBlobStore::new(
                config.storage.media_dir(),
                config.storage.public_base_url.clone(),
            )
            .with_retry(RetryConfig::new(3)),
        );
        monitor.register(
            "storage",
            Arc::new(storage_probe(SnapshotFile::new(
                config.storage.data_dir.join(".probe.json"),
            ))),
            true,
        );

        let resolution = Resolution::parse(&config.jobs.default_resolution).unwrap_or_default();
        let pipeline = JobPipeline::new(
            Arc::new(media),
            Arc::new(tts),
            encoder,
            blobs,
            config.storage.work_dir(),
        )
        .with_default_resolution(resolution);
        let jobs = JobScheduler::with_repository(
            JobSchedulerConfig::from_config(&config.jobs)?,
            pipeline,
            Arc::new(SnapshotRepository::<Job>::open(config.storage.jobs_snapshot())?),
        )?;

        // Publication
        let mut registry = PublisherRegistry::new(config.posts.rate_limit_per_minute);
        for publisher in publishers {
            registry = registry.register(publisher);
        }
        if let Some(url) = &config.providers.webhook_url {
            let mut webhook = WebhookConfig::new(url);
            if let Some(token) = &config.providers.webhook_token {
                webhook = webhook.with_auth_token(token);
            }
            registry = registry.with_fallback(Arc::new(WebhookPublisher::new(webhook)?));
            let probe = HttpProbe::new(url, probe_timeout)?.reachable_only();
            monitor.register("webhook", Arc::new(probe), false);
        }
        let posts = PostScheduler::new(
            PostSchedulerConfig::from_config(&config.posts, config.storage.posts_snapshot()),
            registry,
        )?;

        tracing::info!(
            llms = llms.len(),
            probes = monitor.services().len(),
            data_dir = %config.storage.data_dir.display(),
            "Application context ready"
        );

        Ok(AppContext {
            config,
            cache,
            monitor,
            content,
            jobs,
            posts,
            stop: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

fn language_models(config: &Config) -> Result<Vec<Arc<LlmClient>>> {
    let providers = &config.providers;
    let mut llms = Vec::new();
    if let Some(url) = &providers.ollama_url {
        llms.push(Arc::new(LlmClient::with_config(LlmConfig::ollama(
            url,
            &providers.ollama_model,
        ))?));
    }
    if let Some(url) = &providers.openai_base_url {
        llms.push(Arc::new(LlmClient::with_config(LlmConfig::openai(
            url,
            &providers.openai_model,
            providers.openai_api_key.clone(),
        ))?));
    }
    Ok(llms)
}

/// Healthy when `<program> -version` exits successfully
fn command_probe(program: String) -> impl Probe {
    FnProbe::new(move || {
        let program = program.clone();
        async move {
            let status = tokio::process::Command::new(&program)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map_err(|e| format!("{program}: {e}"))?;
            if status.success() {
                Ok(())
            } else {
                Err(format!("{program} exited with {status}"))
            }
        }
    })
}

/// Healthy when the data directory accepts an atomic write
fn storage_probe(file: SnapshotFile) -> impl Probe {
    let file = Arc::new(file);
    FnProbe::new(move || {
        let file = Arc::clone(&file);
        async move {
            file.save(&serde_json::json!({ "checked_at": chrono::Utc::now() }))
        }
    })
}

impl AppContext {
    pub fn builder(config: Config) -> AppContextBuilder {
        AppContextBuilder {
            config,
            encoder: None,
            publishers: Vec::new(),
        }
    }

    /// Build from configuration with no overrides
    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn content(&self) -> &Arc<ContentOrchestrator> {
        &self.content
    }

    pub fn jobs(&self) -> &JobScheduler {
        &self.jobs
    }

    pub fn posts(&self) -> &PostScheduler {
        &self.posts
    }

    pub fn monitor(&self) -> &Arc<ResilienceMonitor> {
        &self.monitor
    }

    /// Spawn the job, post and probe loops
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return;
        }
        tasks.push(self.jobs.start());
        tasks.push(self.posts.start());
        tasks.push(
            self.monitor
                .start(self.config.resilience_interval(), self.stop.child_token()),
        );
        tracing::info!("Background loops started");
    }

    /// Stop every loop, letting running jobs finish within [`SHUTDOWN_GRACE`]
    pub async fn shutdown(&self) {
        self.shutdown_with_grace(SHUTDOWN_GRACE).await;
    }

    pub async fn shutdown_with_grace(&self, grace: Duration) {
        tracing::info!("Shutting down");
        self.stop.cancel();
        self.jobs.shutdown(grace).await;
        self.posts.shutdown().await;
        self.monitor.persist();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!(
            cache_entries = self.cache.stats().entries,
            "Shutdown complete"
        );
    }
}
