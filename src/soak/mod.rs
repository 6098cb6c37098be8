//! Soak runner
//!
//! Repeats one operation until it succeeds `target_consecutive` times in a
//! row, or gives up after `max_consecutive_failures` failures in a row. Any
//! failure resets the success streak. Per-module statistics are written to a
//! JSON file after every failure and when a run ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::ValidationError;
use crate::storage::{PersistenceError, SnapshotFile};

/// One operation under test
#[async_trait]
pub trait SoakTarget: Send + Sync {
    fn name(&self) -> &str;

    async fn run_once(&self) -> Result<(), String>;
}

/// Closure-backed target
pub struct FnTarget<F> {
    name: String,
    func: F,
}

impl<F> FnTarget<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> SoakTarget for FnTarget<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), String>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_once(&self) -> Result<(), String> {
        (self.func)().await
    }
}

#[derive(Debug, Clone)]
pub struct SoakConfig {
    /// Consecutive successes that pass a module
    pub target_consecutive: u32,
    /// Consecutive failures that abort a module
    pub max_consecutive_failures: u32,
    /// Pause between iterations
    pub pause: Duration,
    pub stats_path: Option<PathBuf>,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            target_consecutive: 1000,
            max_consecutive_failures: 100,
            pause: Duration::ZERO,
            stats_path: None,
        }
    }
}

impl SoakConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.target_consecutive == 0 {
            return Err(ValidationError::invalid("target_consecutive", "must be at least 1"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ValidationError::invalid(
                "max_consecutive_failures",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Counters for one module, accumulated across runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleStatistics {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Occurrences per error message
    pub errors: BTreeMap<String, u64>,
    pub longest_streak: u64,
    pub passed: bool,
    pub last_run: Option<DateTime<Utc>>,
}

impl ModuleStatistics {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// File layout of the statistics written by [`SoakRunner`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoakStatistics {
    pub updated_at: Option<DateTime<Utc>>,
    pub modules: BTreeMap<String, ModuleStatistics>,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SoakVerdict {
    Passed,
    Aborted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SoakReport {
    pub module: String,
    pub verdict: SoakVerdict,
    pub iterations: u64,
    pub failures: u64,
}

pub struct SoakRunner {
    config: SoakConfig,
    stats: SoakStatistics,
    file: Option<SnapshotFile>,
}

impl SoakRunner {
    /// Create a runner, continuing the statistics already on disk
    pub fn new(config: SoakConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        let file = config.stats_path.as_ref().map(SnapshotFile::new);
        let stats = match &file {
            Some(file) => match file.load::<SoakStatistics>() {
                Ok(stats) => stats.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unreadable soak statistics");
                    SoakStatistics::default()
                }
            },
            None => SoakStatistics::default(),
        };
        Ok(Self {
            config,
            stats,
            file,
        })
    }

    pub fn statistics(&self) -> &SoakStatistics {
        &self.stats
    }

    /// Drive `target` until it passes, aborts or `cancel` fires
    pub async fn run(&mut self, target: &dyn SoakTarget, cancel: &CancellationToken) -> SoakReport {
        let module = target.name().to_string();
        let mut streak: u64 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut iterations: u64 = 0;
        let mut failures: u64 = 0;

        tracing::info!(
            module = %module,
            target_consecutive = self.config.target_consecutive,
            max_failures = self.config.max_consecutive_failures,
            "Soak run started"
        );

        let verdict = loop {
            if streak >= u64::from(self.config.target_consecutive) {
                break SoakVerdict::Passed;
            }
            if consecutive_failures >= self.config.max_consecutive_failures {
                break SoakVerdict::Aborted;
            }
            if cancel.is_cancelled() {
                break SoakVerdict::Cancelled;
            }

            iterations += 1;
            let outcome = target.run_once().await;
            let stats = self.stats.modules.entry(module.clone()).or_default();
            stats.attempts += 1;
            stats.last_run = Some(Utc::now());

            match outcome {
                Ok(()) => {
                    stats.successes += 1;
                    streak += 1;
                    stats.longest_streak = stats.longest_streak.max(streak);
                    consecutive_failures = 0;
                    if streak % 100 == 0 {
                        tracing::info!(module = %module, streak, "Soak progress");
                    }
                }
                Err(error) => {
                    stats.failures += 1;
                    *stats.errors.entry(error.clone()).or_insert(0) += 1;
                    failures += 1;
                    consecutive_failures += 1;
                    tracing::warn!(
                        module = %module,
                        error = %error,
                        lost_streak = streak,
                        consecutive_failures,
                        "Soak iteration failed"
                    );
                    streak = 0;
                    self.save();
                }
            }

            if !self.config.pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.pause) => {}
                }
            }
        };

        let stats = self.stats.modules.entry(module.clone()).or_default();
        stats.passed = verdict == SoakVerdict::Passed;
        self.save();

        match verdict {
            SoakVerdict::Passed => {
                tracing::info!(module = %module, iterations, failures, "Soak run passed")
            }
            SoakVerdict::Aborted => tracing::error!(
                module = %module,
                iterations,
                failures,
                "Soak run aborted after consecutive failures"
            ),
            SoakVerdict::Cancelled => tracing::info!(module = %module, iterations, "Soak run cancelled"),
        }

        SoakReport {
            module,
            verdict,
            iterations,
            failures,
        }
    }

    fn save(&mut self) {
        self.stats.updated_at = Some(Utc::now());
        if let Some(file) = &self.file {
            if let Err(e) = file.save(&self.stats) {
                tracing::warn!(error = %e, "Failed to write soak statistics");
            }
        }
    }
}

/// Read a statistics file written by a previous run
pub fn load_statistics(path: impl Into<PathBuf>) -> Result<Option<SoakStatistics>, PersistenceError> {
    SnapshotFile::new(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config(target: u32, max_failures: u32) -> SoakConfig {
        SoakConfig {
            target_consecutive: target,
            max_consecutive_failures: max_failures,
            ..Default::default()
        }
    }

    /// Fails on the listed (1-based) iterations
    fn scripted(failing: &'static [u32]) -> impl SoakTarget {
        let counter = Arc::new(AtomicU32::new(0));
        FnTarget::new("scripted", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if failing.contains(&n) {
                    Err(format!("boom {}", n % 2))
                } else {
                    Ok(())
                }
            }
        })
    }

    #[test]
    fn test_config_validation() {
        assert!(SoakRunner::new(config(0, 1)).is_err());
        assert!(SoakRunner::new(config(1, 0)).is_err());
    }

    #[tokio::test]
    async fn test_failure_resets_streak() {
        let mut runner = SoakRunner::new(config(3, 10)).unwrap();
        let report = runner
            .run(&scripted(&[3]), &CancellationToken::new())
            .await;

        // ok ok FAIL ok ok ok
        assert_eq!(report.verdict, SoakVerdict::Passed);
        assert_eq!(report.iterations, 6);
        let stats = &runner.statistics().modules["scripted"];
        assert_eq!(stats.attempts, 6);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.longest_streak, 3);
        assert!(stats.passed);
    }

    #[tokio::test]
    async fn test_aborts_after_consecutive_failures() {
        let mut runner = SoakRunner::new(config(5, 3)).unwrap();
        let always = FnTarget::new("broken", || async { Err::<(), _>("down".to_string()) });
        let report = runner.run(&always, &CancellationToken::new()).await;

        assert_eq!(report.verdict, SoakVerdict::Aborted);
        assert_eq!(report.iterations, 3);
        let stats = &runner.statistics().modules["broken"];
        assert_eq!(stats.errors["down"], 3);
        assert!(!stats.passed);
    }

    #[tokio::test]
    async fn test_cancel_stops_run() {
        let mut runner = SoakRunner::new(config(5, 3)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = runner.run(&scripted(&[]), &cancel).await;
        assert_eq!(report.verdict, SoakVerdict::Cancelled);
        assert_eq!(report.iterations, 0);
    }

    #[tokio::test]
    async fn test_statistics_written_and_accumulated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("soak_stats.json");
        let soak = SoakConfig {
            stats_path: Some(path.clone()),
            ..config(2, 5)
        };

        let mut first = SoakRunner::new(soak.clone()).unwrap();
        first.run(&scripted(&[1, 2]), &CancellationToken::new()).await;

        let saved = load_statistics(&path).unwrap().unwrap();
        let stats = &saved.modules["scripted"];
        assert_eq!(stats.attempts, 4);
        assert_eq!(stats.errors["boom 1"], 1);
        assert_eq!(stats.errors["boom 0"], 1);

        let mut second = SoakRunner::new(soak).unwrap();
        second.run(&scripted(&[]), &CancellationToken::new()).await;
        assert_eq!(second.statistics().modules["scripted"].attempts, 6);
    }
}
