//! Prometheus metrics for the reelforge pipeline
//!
//! This module provides metrics tracking for:
//! - Fallback chains: provider attempts, fallback usage, cache lookups
//! - Schedulers: job transitions, active workers, job duration, post outcomes
//! - Resilience: probe latency and results
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for provider chain and cache metrics
struct ChainMetrics {
    provider_attempts: CounterVec,
    fallback_uses: CounterVec,
    cache_lookups: CounterVec,
}

/// Container for job/post scheduler metrics
struct SchedulerMetrics {
    job_transitions: CounterVec,
    active_workers: Gauge,
    job_duration: HistogramVec,
    post_outcomes: CounterVec,
}

/// Container for resilience probe metrics
struct ProbeMetrics {
    probe_latency: HistogramVec,
    probe_results: CounterVec,
}

static CHAIN_METRICS: OnceLock<ChainMetrics> = OnceLock::new();
static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();
static PROBE_METRICS: OnceLock<ProbeMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Should be called once at application startup. If metric registration
/// fails, subsequent metric operations become no-ops.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let chain = ChainMetrics {
        provider_attempts: register_counter_vec!(
            "reelforge_provider_attempts_total",
            "Provider attempts by operation, provider and outcome",
            &["operation", "provider", "outcome"]
        )?,
        fallback_uses: register_counter_vec!(
            "reelforge_fallback_uses_total",
            "Calls answered by the local fallback stage",
            &["operation"]
        )?,
        cache_lookups: register_counter_vec!(
            "reelforge_cache_lookups_total",
            "Cache lookups by outcome (hit, miss, stale)",
            &["outcome"]
        )?,
    };

    let scheduler = SchedulerMetrics {
        job_transitions: register_counter_vec!(
            "reelforge_job_transitions_total",
            "Job status transitions",
            &["status"]
        )?,
        active_workers: register_gauge!(
            "reelforge_job_active_workers",
            "Number of pipelines currently running"
        )?,
        job_duration: register_histogram_vec!(
            "reelforge_job_duration_seconds",
            "Wall-clock time of a video pipeline in seconds",
            &["status"],
            vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
        )?,
        post_outcomes: register_counter_vec!(
            "reelforge_post_publish_total",
            "Per-account publication attempts by platform and outcome",
            &["platform", "outcome"]
        )?,
    };

    let probe = ProbeMetrics {
        probe_latency: register_histogram_vec!(
            "reelforge_probe_duration_seconds",
            "Health probe duration in seconds",
            &["service"],
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
        probe_results: register_counter_vec!(
            "reelforge_probe_results_total",
            "Health probe results by service and outcome",
            &["service", "outcome"]
        )?,
    };

    CHAIN_METRICS
        .set(chain)
        .map_err(|_| "Chain metrics already initialized")?;
    SCHEDULER_METRICS
        .set(scheduler)
        .map_err(|_| "Scheduler metrics already initialized")?;
    PROBE_METRICS
        .set(probe)
        .map_err(|_| "Probe metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    CHAIN_METRICS.get().is_some()
        && SCHEDULER_METRICS.get().is_some()
        && PROBE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record one provider attempt inside a fallback chain
pub fn record_provider_attempt(operation: &str, provider: &str, success: bool) {
    if let Some(m) = CHAIN_METRICS.get() {
        m.provider_attempts
            .with_label_values(&[operation, provider, outcome(success)])
            .inc();
    }
}

/// Record a call answered by the local fallback
pub fn record_fallback_use(operation: &str) {
    if let Some(m) = CHAIN_METRICS.get() {
        m.fallback_uses.with_label_values(&[operation]).inc();
    }
}

/// Record a cache lookup (`hit`, `miss` or `stale`)
pub fn record_cache_lookup(result: &str) {
    if let Some(m) = CHAIN_METRICS.get() {
        m.cache_lookups.with_label_values(&[result]).inc();
    }
}

/// Record a job entering `status`
pub fn record_job_transition(status: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.job_transitions.with_label_values(&[status]).inc();
    }
}

/// Update the running-pipelines gauge
pub fn set_active_workers(count: usize) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.active_workers.set(count as f64);
    }
}

/// Record a finished pipeline's duration
pub fn observe_job_duration(status: &str, duration_secs: f64) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.job_duration
            .with_label_values(&[status])
            .observe(duration_secs);
    }
}

/// Record a per-account publication attempt
pub fn record_post_outcome(platform: &str, success: bool) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.post_outcomes
            .with_label_values(&[platform, outcome(success)])
            .inc();
    }
}

/// Record a probe result
pub fn record_probe(service: &str, success: bool, duration_secs: f64) {
    let Some(m) = PROBE_METRICS.get() else {
        return;
    };

    m.probe_results
        .with_label_values(&[service, outcome(success)])
        .inc();
    m.probe_latency
        .with_label_values(&[service])
        .observe(duration_secs);
}

// ============================================================================
// Tests
// ============================================================================
