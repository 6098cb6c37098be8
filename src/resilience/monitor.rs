//! Periodic health probing with rolling history and persisted statistics

use chrono::Utc;
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{PersistedStatistics, Probe, ProbeOutcome, ResilienceRecord, ServiceStatistics, SystemStatus};
use crate::config::ResilienceConfig;
use crate::provider::{AttemptRecord, AttemptRecorder};
use crate::storage::SnapshotFile;

/// Monitor settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Records kept per service
    pub history_limit: usize,
    pub healthy_threshold: f64,
    /// Deadline for a single probe
    pub probe_timeout: Duration,
    /// Statistics file; nothing is persisted when absent
    pub stats_path: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            healthy_threshold: 0.7,
            probe_timeout: Duration::from_secs(10),
            stats_path: None,
        }
    }
}

impl MonitorConfig {
    pub fn from_config(config: &ResilienceConfig, stats_path: impl Into<PathBuf>) -> Self {
        Self {
            history_limit: config.history_limit,
            healthy_threshold: config.healthy_threshold,
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            stats_path: Some(stats_path.into()),
        }
    }
}

struct RegisteredProbe {
    service: String,
    probe: Arc<dyn Probe>,
}

#[derive(Default)]
struct MonitorState {
    stats: BTreeMap<String, ServiceStatistics>,
    history: HashMap<String, VecDeque<ResilienceRecord>>,
}

/// Runs registered probes and keeps per-service statistics
///
/// Never fails from [`run_all`](Self::run_all) or [`run`](Self::run): probe
/// errors, timeouts and panics are recorded as unsuccessful records.
pub struct ResilienceMonitor {
    config: MonitorConfig,
    probes: RwLock<Vec<RegisteredProbe>>,
    state: Mutex<MonitorState>,
    snapshot: Option<SnapshotFile>,
    /// Serializes batches so probes never run in parallel
    batch: tokio::sync::Mutex<()>,
    /// Held across snapshot and save
    saving: Mutex<()>,
}

impl ResilienceMonitor {
    /// Create a monitor, restoring statistics from the previous run when present
    pub fn new(config: MonitorConfig) -> Self {
        let snapshot = config.stats_path.as_ref().map(SnapshotFile::new);

        let mut state = MonitorState::default();
        if let Some(file) = &snapshot {
            match file.load::<PersistedStatistics>() {
                Ok(Some(persisted)) => {
                    tracing::info!(
                        services = persisted.services.len(),
                        saved_at = %persisted.timestamp,
                        "Restored resilience statistics"
                    );
                    state.stats = persisted
                        .services
                        .into_iter()
                        .map(|s| (s.service.clone(), s))
                        .collect();
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Ignoring unreadable resilience statistics"),
            }
        }

        Self {
            config,
            probes: RwLock::new(Vec::new()),
            state: Mutex::new(state),
            snapshot,
            batch: tokio::sync::Mutex::new(()),
            saving: Mutex::new(()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add (or replace) the probe for `service`; nothing runs until the next batch
    pub fn register(&self, service: impl Into<String>, probe: Arc<dyn Probe>, critical: bool) {
        let service = service.into();
        {
            let mut probes = self.probes.write().unwrap_or_else(PoisonError::into_inner);
            probes.retain(|p| p.service != service);
            probes.push(RegisteredProbe {
                service: service.clone(),
                probe,
            });
        }

        self.state()
            .stats
            .entry(service.clone())
            .and_modify(|s| s.critical = critical)
            .or_insert_with(|| ServiceStatistics::new(&service, critical));
        tracing::debug!(service = %service, critical, "Probe registered");
    }

    pub fn services(&self) -> Vec<String> {
        self.probes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.service.clone())
            .collect()
    }

    fn is_registered(&self, service: &str) -> bool {
        self.probes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| p.service == service)
    }

    /// Run every probe one after another, then persist statistics
    pub async fn run_all(&self) -> Vec<ResilienceRecord> {
        let _batch = self.batch.lock().await;
        let probes: Vec<(String, Arc<dyn Probe>)> = self
            .probes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| (p.service.clone(), Arc::clone(&p.probe)))
            .collect();

        let mut records = Vec::with_capacity(probes.len());
        for (service, probe) in probes {
            records.push(self.execute(&service, probe.as_ref()).await);
        }

        let failed = records.iter().filter(|r| !r.success).count();
        tracing::info!(probes = records.len(), failed, "Resilience batch finished");
        self.persist();
        records
    }

    /// Run one probe on demand; `None` when `service` has no probe
    pub async fn run(&self, service: &str) -> Option<ResilienceRecord> {
        let probe = self
            .probes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.service == service)
            .map(|p| Arc::clone(&p.probe))?;

        let record = self.execute(service, probe.as_ref()).await;
        self.persist();
        Some(record)
    }

    async fn execute(&self, service: &str, probe: &dyn Probe) -> ResilienceRecord {
        let started = Instant::now();
        let guarded = AssertUnwindSafe(probe.check()).catch_unwind();
        let outcome = match tokio::time::timeout(self.config.probe_timeout, guarded).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => ProbeOutcome::failed("probe panicked"),
            Err(_) => ProbeOutcome::failed(format!(
                "probe timed out after {}ms",
                self.config.probe_timeout.as_millis()
            )),
        };
        let elapsed = started.elapsed();

        crate::metrics::record_probe(service, outcome.success, elapsed.as_secs_f64());
        if outcome.success {
            tracing::debug!(service = %service, elapsed_ms = elapsed.as_millis() as u64, "Probe succeeded");
        } else {
            tracing::warn!(
                service = %service,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Probe failed"
            );
        }

        let record = ResilienceRecord {
            service: service.to_string(),
            success: outcome.success,
            response_time_ms: elapsed.as_millis() as u64,
            fallback_used: outcome.fallback_used,
            fallback_service: outcome.fallback_service,
            error_message: outcome.error,
            timestamp: Utc::now(),
        };
        self.append(record.clone());
        record
    }

    /// Add a record to the rolling history and statistics
    pub fn append(&self, record: ResilienceRecord) {
        let threshold = self.config.healthy_threshold;
        let limit = self.config.history_limit.max(1);
        let mut state = self.state();

        state
            .stats
            .entry(record.service.clone())
            .or_insert_with(|| ServiceStatistics::new(&record.service, false))
            .record(&record, threshold);

        let history = state.history.entry(record.service.clone()).or_default();
        history.push_back(record);
        while history.len() > limit {
            history.pop_front();
        }
    }

    /// Records for `service`, oldest first
    pub fn history(&self, service: &str) -> Vec<ResilienceRecord> {
        self.state()
            .history
            .get(service)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Health of the registered services
    ///
    /// Statistics restored for services without a probe in this run are kept
    /// on disk but left out of the status.
    pub fn get_status(&self) -> SystemStatus {
        let registered = self.services();
        let services = self
            .state()
            .stats
            .values()
            .filter(|s| registered.contains(&s.service))
            .cloned()
            .collect();
        SystemStatus::from_services(services, self.config.healthy_threshold)
    }

    /// Write the statistics file; failures are logged only
    pub fn persist(&self) {
        let Some(file) = &self.snapshot else {
            return;
        };
        let _saving = self.saving.lock().unwrap_or_else(PoisonError::into_inner);
        let persisted = PersistedStatistics {
            timestamp: Utc::now(),
            services: self.state().stats.values().cloned().collect(),
        };
        if let Err(e) = file.save(&persisted) {
            tracing::warn!(error = %e, "Failed to persist resilience statistics");
        }
    }

    /// Run a batch now and then every `interval` until `stop` fires
    pub fn start(self: &Arc<Self>, interval: Duration, stop: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_secs = interval.as_secs(), "Resilience monitor started");

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.run_all().await;
                    }
                }
            }
            tracing::info!("Resilience monitor stopped");
        })
    }
}

impl AttemptRecorder for ResilienceMonitor {
    /// Provider attempts count toward a service's statistics when it is registered
    fn record_attempt(&self, attempt: &AttemptRecord) {
        if !self.is_registered(&attempt.provider) {
            return;
        }
        self.append(ResilienceRecord {
            service: attempt.provider.clone(),
            success: attempt.success,
            response_time_ms: attempt.duration_ms,
            fallback_used: false,
            fallback_service: None,
            error_message: attempt.error.clone(),
            timestamp: Utc::now(),
        });
    }
}
