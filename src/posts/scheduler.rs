//! Time-gated publication queue with bounded retries
//!
//! Every tick picks the posts that are `scheduled` and due, publishes each
//! pending account independently and settles the post. A retry only
//! re-attempts the accounts that have not succeeded yet. The full post list
//! is written to the snapshot after every mutation and reloaded on start.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{PostError, PostRequest, PostResult, PostStatus, PublisherRegistry, ScheduledPost};
use crate::config::PostsConfig;
use crate::error::ValidationError;
use crate::storage::SnapshotFile;

/// Post scheduler settings
#[derive(Debug, Clone)]
pub struct PostSchedulerConfig {
    pub tick: Duration,
    /// Attempt budget for requests that do not set one
    pub default_max_retries: u32,
    /// Snapshot location; nothing is persisted when absent
    pub snapshot_path: Option<PathBuf>,
}

impl Default for PostSchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            default_max_retries: 3,
            snapshot_path: None,
        }
    }
}

impl PostSchedulerConfig {
    pub fn from_config(config: &PostsConfig, snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            tick: Duration::from_secs(config.tick_secs),
            default_max_retries: config.max_retries,
            snapshot_path: Some(snapshot_path.into()),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tick.is_zero() {
            return Err(ValidationError::invalid("tick", "must be greater than zero"));
        }
        if self.default_max_retries == 0 {
            return Err(ValidationError::invalid("max_retries", "must be at least 1"));
        }
        Ok(())
    }
}

/// What one review pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub processed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

struct Inner {
    config: PostSchedulerConfig,
    posts: RwLock<Vec<ScheduledPost>>,
    registry: PublisherRegistry,
    snapshot: Option<SnapshotFile>,
    /// Held for the duration of a tick; overlapping ticks are skipped
    busy: Mutex<()>,
    /// Held across clone and save so the newest state is written last
    saving: Mutex<()>,
    stop: CancellationToken,
    ticks: TaskTracker,
}

/// Queue of social-media publications
#[derive(Clone)]
pub struct PostScheduler {
    inner: Arc<Inner>,
}

impl PostScheduler {
    /// Create the scheduler and restore any snapshot
    ///
    /// Posts caught mid-processing by a restart go back to `scheduled`. An
    /// unreadable snapshot is logged and the queue starts empty; the next
    /// save replaces it.
    pub fn new(config: PostSchedulerConfig, registry: PublisherRegistry) -> Result<Self, PostError> {
        config.validate()?;
        let snapshot = config.snapshot_path.as_ref().map(SnapshotFile::new);

        let loaded = snapshot
            .as_ref()
            .map(|file| file.load::<Vec<ScheduledPost>>());
        let mut posts = match loaded {
            Some(Ok(stored)) => stored.unwrap_or_default(),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Post snapshot unreadable, starting with an empty queue");
                Vec::new()
            }
            None => Vec::new(),
        };
        let mut resumed = 0;
        for post in posts.iter_mut().filter(|p| p.status == PostStatus::Processing) {
            post.status = PostStatus::Scheduled;
            resumed += 1;
        }
        if !posts.is_empty() {
            tracing::info!(posts = posts.len(), resumed, "Restored scheduled posts");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                posts: RwLock::new(posts),
                registry,
                snapshot,
                busy: Mutex::new(()),
                saving: Mutex::new(()),
                stop: CancellationToken::new(),
                ticks: TaskTracker::new(),
            }),
        })
    }

    // ------------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------------

    /// Validate and store a post; it is published on the first tick after its time
    pub async fn schedule(&self, request: PostRequest) -> Result<String, PostError> {
        request.validate()?;

        let mut accounts = Vec::with_capacity(request.accounts.len());
        for account in request.accounts {
            if !accounts.contains(&account) {
                accounts.push(account);
            }
        }
        if let Some(unsupported) = accounts.iter().find(|a| !self.inner.registry.supports(&a.platform)) {
            return Err(ValidationError::invalid(
                "accounts",
                format!("no publisher for platform '{}'", unsupported.platform),
            )
            .into());
        }

        let post = ScheduledPost {
            id: uuid::Uuid::new_v4().to_string(),
            content: request.content,
            accounts,
            status: PostStatus::Scheduled,
            results: Default::default(),
            retries: 0,
            max_retries: request
                .max_retries
                .unwrap_or(self.inner.config.default_max_retries),
            created_at: Utc::now(),
            processed_at: None,
        };
        let id = post.id.clone();

        tracing::info!(
            post_id = %id,
            accounts = post.accounts.len(),
            scheduled_time = ?post.content.scheduled_time,
            "Post scheduled"
        );
        self.inner.posts.write().await.push(post);
        self.persist().await;
        Ok(id)
    }

    /// Withdraw a post that has not started processing
    pub async fn cancel(&self, id: &str) -> Result<(), PostError> {
        {
            let mut posts = self.inner.posts.write().await;
            let post = posts
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| PostError::NotFound(id.to_string()))?;
            if post.status != PostStatus::Scheduled {
                return Err(PostError::NotCancellable {
                    id: id.to_string(),
                    status: post.status,
                });
            }
            post.status = PostStatus::Cancelled;
        }
        tracing::info!(post_id = %id, "Post cancelled");
        self.persist().await;
        Ok(())
    }

    pub async fn status(&self, id: &str) -> Result<ScheduledPost, PostError> {
        self.inner
            .posts
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| PostError::NotFound(id.to_string()))
    }

    /// Posts in creation order, optionally filtered by status
    pub async fn list(&self, status: Option<PostStatus>) -> Vec<ScheduledPost> {
        self.inner
            .posts
            .read()
            .await
            .iter()
            .filter(|p| status.map_or(true, |wanted| wanted == p.status))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------------

    /// One review pass; `None` when another pass is still running or the
    /// scheduler has shut down
    pub async fn tick(&self) -> Option<TickReport> {
        let Ok(_busy) = self.inner.busy.try_lock() else {
            tracing::debug!("Previous post review still running, skipping tick");
            return None;
        };
        if self.inner.stop.is_cancelled() {
            return None;
        }

        let now = Utc::now();
        let due: Vec<String> = self
            .inner
            .posts
            .read()
            .await
            .iter()
            .filter(|p| p.is_due(now))
            .map(|p| p.id.clone())
            .collect();

        let mut report = TickReport::default();
        for id in due {
            if let Some(status) = self.process(&id).await {
                report.processed += 1;
                match status {
                    PostStatus::Completed => report.completed += 1,
                    PostStatus::Scheduled => report.retried += 1,
                    PostStatus::Failed => report.failed += 1,
                    _ => {}
                }
            }
        }

        if report.processed > 0 {
            tracing::info!(
                processed = report.processed,
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                "Post review finished"
            );
        }
        Some(report)
    }

    async fn process(&self, id: &str) -> Option<PostStatus> {
        let post = {
            let mut posts = self.inner.posts.write().await;
            let post = posts.iter_mut().find(|p| p.id == id)?;
            // cancelled between selection and processing
            if post.status != PostStatus::Scheduled {
                return None;
            }
            post.status = PostStatus::Processing;
            post.clone()
        };
        self.persist().await;

        let mut results = Vec::new();
        for account in post.pending_accounts() {
            let result = match self.inner.registry.publish(&account, &post.content).await {
                Ok(url) => PostResult::published(url),
                Err(e) => {
                    tracing::warn!(
                        post_id = %id,
                        account = %account.key(),
                        error = %e,
                        "Publication failed"
                    );
                    PostResult::failed(e.to_string())
                }
            };
            results.push((account.key(), result));
        }

        let status = {
            let mut posts = self.inner.posts.write().await;
            let post = posts.iter_mut().find(|p| p.id == id)?;
            post.results.extend(results);
            let status = post.settle(Utc::now());
            match status {
                PostStatus::Failed => tracing::error!(
                    post_id = %id,
                    retries = post.retries,
                    pending = post.pending_accounts().len(),
                    "Post failed after exhausting retries"
                ),
                PostStatus::Scheduled => tracing::info!(
                    post_id = %id,
                    retries = post.retries,
                    max_retries = post.max_retries,
                    "Post partially failed, will retry"
                ),
                _ => tracing::info!(post_id = %id, "Post published to every account"),
            }
            status
        };
        self.persist().await;
        Some(status)
    }

    /// Spawn the review loop; the first pass runs after one tick
    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let period = scheduler.inner.config.tick;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(tick_secs = period.as_secs(), "Post scheduler started");

            loop {
                tokio::select! {
                    _ = scheduler.inner.stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let worker = scheduler.clone();
                        // a slow pass must not delay the next tick; the busy guard skips overlaps
                        scheduler.inner.ticks.spawn(async move { worker.tick().await });
                    }
                }
            }
            tracing::info!("Post scheduler loop stopped");
        })
    }

    /// Stop the loop, wait for spawned passes and flush the snapshot
    pub async fn shutdown(&self) {
        self.inner.stop.cancel();
        self.inner.ticks.close();
        self.inner.ticks.wait().await;
        let _busy = self.inner.busy.lock().await;
        self.persist().await;
    }

    /// Write the snapshot; failures are logged and in-memory state stays authoritative
    async fn persist(&self) {
        let Some(file) = &self.inner.snapshot else {
            return;
        };
        let _saving = self.inner.saving.lock().await;
        let posts = self.inner.posts.read().await.clone();
        if let Err(e) = file.save(&posts) {
            tracing::warn!(error = %e, "Failed to persist post snapshot");
        }
    }
}
