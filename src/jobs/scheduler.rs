//! Bounded worker pool over a FIFO job queue
//!
//! A tick loop wakes every `tick` (or as soon as a job is submitted or a
//! worker frees its slot), pops queued ids while a worker slot is free and
//! spawns one pipeline task per id. Slots are semaphore permits, so at most
//! `max_concurrent_workers` jobs are ever `processing`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::pipeline::{JobPipeline, ProgressSink};
use super::{Job, JobError, JobEvent, JobStage, JobStatus, VideoJobRequest};
use crate::config::JobsConfig;
use crate::error::ValidationError;
use crate::storage::{PersistenceError, Repository};

// ============================================================================
// Configuration
// ============================================================================

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    pub max_concurrent_workers: usize,
    pub tick: Duration,
    pub event_capacity: usize,
    /// Completed and failed jobs kept before the oldest are dropped
    pub retain_finished: usize,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 2,
            tick: Duration::from_secs(1),
            event_capacity: 256,
            retain_finished: 200,
        }
    }
}

impl JobSchedulerConfig {
    pub fn builder() -> JobSchedulerConfigBuilder {
        JobSchedulerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Scheduler settings from the `[jobs]` config section
    pub fn from_config(config: &JobsConfig) -> Result<Self, ValidationError> {
        Self::builder()
            .max_concurrent_workers(config.max_concurrent_workers)
            .tick(Duration::from_millis(config.tick_ms))
            .retain_finished(config.retain_finished)
            .build()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_workers == 0 {
            return Err(ValidationError::invalid(
                "max_concurrent_workers",
                "must be at least 1",
            ));
        }
        if self.tick.is_zero() {
            return Err(ValidationError::invalid("tick", "must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(ValidationError::invalid("event_capacity", "must be at least 1"));
        }
        if self.retain_finished == 0 {
            return Err(ValidationError::invalid("retain_finished", "must be at least 1"));
        }
        Ok(())
    }
}

pub struct JobSchedulerConfigBuilder {
    config: JobSchedulerConfig,
}

impl JobSchedulerConfigBuilder {
    pub fn max_concurrent_workers(mut self, workers: usize) -> Self {
        self.config.max_concurrent_workers = workers;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.config.tick = tick;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn retain_finished(mut self, jobs: usize) -> Self {
        self.config.retain_finished = jobs;
        self
    }

    pub fn build(self) -> Result<JobSchedulerConfig, ValidationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Job table
// ============================================================================

/// Authoritative job map plus event fan-out and optional persistence mirror
///
/// Only status transitions reach the mirror; progress and fallback notes
/// ride along with the next transition.
struct JobTable {
    jobs: RwLock<HashMap<String, Job>>,
    events: broadcast::Sender<JobEvent>,
    mirror: Option<Arc<dyn Repository<Job>>>,
}

impl JobTable {
    async fn insert(&self, job: Job) {
        let snapshot = job.clone();
        self.jobs.write().await.insert(job.id.clone(), job);
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.create(snapshot).await {
                tracing::warn!(error = %e, "Failed to mirror new job");
            }
        }
    }

    async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Mutate one job in memory
    async fn update<R>(&self, id: &str, change: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut jobs = self.jobs.write().await;
        jobs.get_mut(id).map(change)
    }

    /// Mutate one job under the write lock, then mirror the result
    async fn transition<R>(&self, id: &str, change: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let (result, snapshot) = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(id)?;
            let result = change(job);
            (result, job.clone())
        };
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.update(snapshot).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to mirror job update");
            }
        }
        Some(result)
    }

    /// Load mirrored jobs missing from memory
    ///
    /// Jobs the previous run left queued or processing have lost their
    /// request, so they come back failed.
    async fn restore(&self) -> Result<usize, PersistenceError> {
        let Some(mirror) = &self.mirror else {
            return Ok(0);
        };
        let stored = mirror.list().await?;

        let mut interrupted = Vec::new();
        let mut restored = 0;
        {
            let mut jobs = self.jobs.write().await;
            for mut job in stored {
                if jobs.contains_key(&job.id) {
                    continue;
                }
                if !job.status.is_terminal() && job.fail("interrupted").is_ok() {
                    interrupted.push(job.clone());
                }
                jobs.insert(job.id.clone(), job);
                restored += 1;
            }
        }

        for job in interrupted {
            tracing::warn!(job_id = %job.id, title = %job.title, "Job interrupted by restart");
            if let Err(e) = mirror.update(job).await {
                tracing::warn!(error = %e, "Failed to mirror interrupted job");
            }
        }
        Ok(restored)
    }

    /// Drop the oldest finished jobs beyond `keep`
    async fn prune(&self, keep: usize) {
        let removed: Vec<String> = {
            let mut jobs = self.jobs.write().await;
            let mut finished: Vec<(DateTime<Utc>, String)> = jobs
                .values()
                .filter(|job| job.status.is_terminal())
                .map(|job| (job.ended_at.unwrap_or(job.created_at), job.id.clone()))
                .collect();
            if finished.len() <= keep {
                return;
            }
            finished.sort();
            let excess = finished.len() - keep;
            finished
                .into_iter()
                .take(excess)
                .map(|(_, id)| {
                    jobs.remove(&id);
                    id
                })
                .collect()
        };

        tracing::debug!(removed = removed.len(), keep, "Pruned finished jobs");
        if let Some(mirror) = &self.mirror {
            for id in &removed {
                if let Err(e) = mirror.delete(id).await {
                    tracing::warn!(job_id = %id, error = %e, "Failed to drop pruned job from mirror");
                }
            }
        }
    }

    fn emit(&self, event: JobEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }
}

/// Progress sink bound to one job
struct JobProgress<'a> {
    table: &'a JobTable,
    id: &'a str,
}

#[async_trait]
impl ProgressSink for JobProgress<'_> {
    async fn advance(&self, stage: JobStage, progress: u8) {
        let changed = self
            .table
            .update(self.id, |job| job.advance(stage, progress).then_some(job.progress))
            .await
            .flatten();
        if let Some(progress) = changed {
            tracing::debug!(job_id = %self.id, stage = %stage, progress, "Job progress");
            self.table.emit(JobEvent::Progress {
                id: self.id.to_string(),
                stage,
                progress,
            });
        }
    }

    async fn note_fallback(&self, label: String) {
        tracing::info!(job_id = %self.id, fallback = %label, "Pipeline stage used fallback");
        self.table.update(self.id, |job| job.fallbacks.push(label)).await;
    }
}

// ============================================================================
// Scheduler
// ============================================================================

struct Inner {
    config: JobSchedulerConfig,
    table: JobTable,
    queue: Mutex<VecDeque<String>>,
    requests: Mutex<HashMap<String, VideoJobRequest>>,
    pipeline: JobPipeline,
    slots: Arc<Semaphore>,
    active: AtomicUsize,
    wake: Notify,
    /// Stops the tick loop and rejects new submissions
    stop: CancellationToken,
    /// Parent of every running job's token
    abort: CancellationToken,
    /// Token per dispatched job, held until its worker exits
    running: Mutex<HashMap<String, CancellationToken>>,
    tracker: TaskTracker,
}

/// Queue of video jobs consumed by a fixed-size worker pool
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

/// Decrements the active-worker count however the worker exits
struct WorkerGuard<'a> {
    inner: &'a Inner,
}

impl<'a> WorkerGuard<'a> {
    fn enter(inner: &'a Inner) -> Self {
        let active = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        crate::metrics::set_active_workers(active);
        Self { inner }
    }
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        let active = self.inner.active.fetch_sub(1, Ordering::SeqCst) - 1;
        crate::metrics::set_active_workers(active);
        self.inner.wake.notify_one();
    }
}

impl JobScheduler {
    pub fn new(config: JobSchedulerConfig, pipeline: JobPipeline) -> Result<Self, JobError> {
        Self::build(config, pipeline, None)
    }

    /// Like [`new`](Self::new), mirroring job status changes into `repository`
    ///
    /// Jobs already in `repository` are loaded by [`restore`](Self::restore).
    pub fn with_repository(
        config: JobSchedulerConfig,
        pipeline: JobPipeline,
        repository: Arc<dyn Repository<Job>>,
    ) -> Result<Self, JobError> {
        Self::build(config, pipeline, Some(repository))
    }

    fn build(
        config: JobSchedulerConfig,
        pipeline: JobPipeline,
        mirror: Option<Arc<dyn Repository<Job>>>,
    ) -> Result<Self, JobError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let slots = Arc::new(Semaphore::new(config.max_concurrent_workers));

        Ok(Self {
            inner: Arc::new(Inner {
                table: JobTable {
                    jobs: RwLock::new(HashMap::new()),
                    events,
                    mirror,
                },
                config,
                queue: Mutex::new(VecDeque::new()),
                requests: Mutex::new(HashMap::new()),
                pipeline,
                slots,
                active: AtomicUsize::new(0),
                wake: Notify::new(),
                stop: CancellationToken::new(),
                abort: CancellationToken::new(),
                running: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
            }),
        })
    }

    // ------------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------------

    /// Validate and enqueue a job; returns its id without waiting
    pub async fn submit(&self, request: VideoJobRequest) -> Result<String, JobError> {
        if self.inner.stop.is_cancelled() {
            return Err(JobError::ShuttingDown);
        }
        request.validate()?;

        let id = uuid::Uuid::new_v4().to_string();
        let job = Job::new(&id, request.title.trim());

        self.inner.table.insert(job).await;
        self.inner.requests.lock().await.insert(id.clone(), request);
        self.inner.queue.lock().await.push_back(id.clone());

        crate::metrics::record_job_transition(JobStatus::Queued.as_str());
        tracing::info!(job_id = %id, "Job queued");
        self.inner.table.emit(JobEvent::Queued { id: id.clone() });
        self.inner.wake.notify_one();

        Ok(id)
    }

    pub async fn status(&self, id: &str) -> Result<Job, JobError> {
        self.inner
            .table
            .get(id)
            .await
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Every known job, most recent first
    pub async fn list_all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.table.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        jobs
    }

    /// Load jobs recorded by a previous run; returns how many were added
    pub async fn restore(&self) -> Result<usize, JobError> {
        let restored = self.inner.table.restore().await?;
        if restored > 0 {
            tracing::info!(jobs = restored, "Restored jobs from snapshot");
            self.inner
                .table
                .prune(self.inner.config.retain_finished)
                .await;
        }
        Ok(restored)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.table.events.subscribe()
    }

    pub fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    pub fn max_concurrent_workers(&self) -> usize {
        self.inner.config.max_concurrent_workers
    }

    /// Cancel a queued job at once, or signal a processing job to stop at its next stage boundary
    pub async fn cancel(&self, id: &str) -> Result<JobStatus, JobError> {
        let job = self.status(id).await?;
        match job.status {
            JobStatus::Queued => {
                let removed = {
                    let mut queue = self.inner.queue.lock().await;
                    let before = queue.len();
                    queue.retain(|queued| queued != id);
                    queue.len() != before
                };
                if removed {
                    self.inner.requests.lock().await.remove(id);
                    self.finish_failed(id, "cancelled").await?;
                    return Ok(JobStatus::Failed);
                }
                // popped by a worker in the meantime
                self.signal_running(id).await
            }
            JobStatus::Processing => self.signal_running(id).await,
            status => Err(JobError::AlreadyTerminal {
                id: id.to_string(),
                status,
            }),
        }
    }

    async fn signal_running(&self, id: &str) -> Result<JobStatus, JobError> {
        if let Some(token) = self.inner.running.lock().await.get(id) {
            token.cancel();
            tracing::info!(job_id = %id, "Cancellation requested");
            return Ok(JobStatus::Processing);
        }
        // the worker settled the job after the status read
        let job = self.status(id).await?;
        if job.status.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                id: id.to_string(),
                status: job.status,
            });
        }
        Ok(job.status)
    }

    // ------------------------------------------------------------------------
    // Scheduling loop
    // ------------------------------------------------------------------------

    /// Spawn the tick loop, restoring mirrored jobs first
    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.restore().await {
                tracing::warn!(error = %e, "Could not restore jobs, continuing without them");
            }

            let mut ticker = tokio::time::interval(scheduler.inner.config.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(
                workers = scheduler.inner.config.max_concurrent_workers,
                tick_ms = scheduler.inner.config.tick.as_millis() as u64,
                "Job scheduler started"
            );

            loop {
                tokio::select! {
                    _ = scheduler.inner.stop.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = scheduler.inner.wake.notified() => {}
                }
                scheduler.dispatch().await;
            }

            tracing::info!("Job scheduler loop stopped");
        })
    }

    /// Launch queued jobs into free worker slots; returns how many started
    pub async fn dispatch(&self) -> usize {
        let mut launched = 0;
        while !self.inner.stop.is_cancelled() {
            let Ok(permit) = self.inner.slots.clone().try_acquire_owned() else {
                break;
            };
            let (id, token) = {
                let mut queue = self.inner.queue.lock().await;
                let Some(id) = queue.pop_front() else {
                    break;
                };
                // registered before the queue lock drops so cancel always finds the job
                let token = self.inner.abort.child_token();
                self.inner.running.lock().await.insert(id.clone(), token.clone());
                (id, token)
            };

            let inner = Arc::clone(&self.inner);
            self.inner.tracker.spawn(run_job(inner, id, token, permit));
            launched += 1;
        }
        launched
    }

    /// Stop dispatching, give running jobs `grace` to finish, then cancel the rest
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.stop.cancel();
        self.inner.tracker.close();

        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                active = self.active_workers(),
                "Grace period elapsed, cancelling running jobs"
            );
            self.inner.abort.cancel();
            self.inner.tracker.wait().await;
        }
        tracing::info!(queued = self.queue_len().await, "Job scheduler shut down");
    }

    async fn finish_failed(&self, id: &str, error: &str) -> Result<(), JobError> {
        finish_failed(&self.inner, id, error).await
    }
}

async fn finish_failed(inner: &Inner, id: &str, error: &str) -> Result<(), JobError> {
    let outcome = inner
        .table
        .transition(id, |job| job.fail(error).map(|_| job.duration_secs()))
        .await
        .ok_or_else(|| JobError::NotFound(id.to_string()))?;
    let duration = outcome?;

    crate::metrics::record_job_transition(JobStatus::Failed.as_str());
    if let Some(secs) = duration {
        crate::metrics::observe_job_duration(JobStatus::Failed.as_str(), secs);
    }
    tracing::error!(job_id = %id, error = %error, "Job failed");
    inner.table.emit(JobEvent::Failed {
        id: id.to_string(),
        error: error.to_string(),
    });
    inner.table.prune(inner.config.retain_finished).await;
    Ok(())
}

async fn run_job(
    inner: Arc<Inner>,
    id: String,
    token: CancellationToken,
    _permit: OwnedSemaphorePermit,
) {
    let _guard = WorkerGuard::enter(&inner);
    execute_job(&inner, &id, &token).await;
    inner.running.lock().await.remove(&id);
}

async fn execute_job(inner: &Inner, id: &str, token: &CancellationToken) {
    let Some(request) = inner.requests.lock().await.remove(id) else {
        tracing::debug!(job_id = %id, "Job no longer pending");
        return;
    };

    if token.is_cancelled() {
        // cancelled between dispatch and start
        if let Err(e) = finish_failed(inner, id, "cancelled").await {
            tracing::warn!(job_id = %id, error = %e, "Could not mark job failed");
        }
        return;
    }

    match inner.table.transition(id, Job::start).await {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            tracing::debug!(job_id = %id, error = %e, "Skipping job");
            return;
        }
        None => return,
    }
    crate::metrics::record_job_transition(JobStatus::Processing.as_str());
    tracing::info!(job_id = %id, title = %request.title, "Job started");
    inner.table.emit(JobEvent::Started { id: id.to_string() });

    let progress = JobProgress {
        table: &inner.table,
        id,
    };
    let result = inner.pipeline.run(id, &request, &progress, token).await;

    match result {
        Ok(output) => {
            let video_url = output.video_url.clone();
            let completed = inner
                .table
                .transition(id, |job| {
                    job.complete(output.video_url, output.thumbnail_url)
                        .map(|_| job.duration_secs())
                })
                .await;
            match completed {
                Some(Ok(duration)) => {
                    crate::metrics::record_job_transition(JobStatus::Completed.as_str());
                    if let Some(secs) = duration {
                        crate::metrics::observe_job_duration(JobStatus::Completed.as_str(), secs);
                    }
                    tracing::info!(job_id = %id, video_url = %video_url, "Job completed");
                    inner.table.emit(JobEvent::Completed {
                        id: id.to_string(),
                        video_url,
                    });
                    inner.table.prune(inner.config.retain_finished).await;
                }
                Some(Err(e)) => tracing::warn!(job_id = %id, error = %e, "Could not complete job"),
                None => {}
            }
        }
        Err(e) => {
            if let Err(update_err) = finish_failed(inner, id, &e.to_string()).await {
                tracing::warn!(job_id = %id, error = %update_err, "Could not mark job failed");
            }
        }
    }
}
