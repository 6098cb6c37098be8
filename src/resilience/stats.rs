//! Probe records and per-service statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One probe run or provider attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceRecord {
    pub service: String,
    pub success: bool,
    pub response_time_ms: u64,
    pub fallback_used: bool,
    pub fallback_service: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate of every record for one service, updated incrementally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatistics {
    pub service: String,
    pub critical: bool,
    pub total_attempts: u64,
    pub successes: u64,
    pub fallback_uses: u64,
    /// `successes / total_attempts`
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub fallback_usage_rate: f64,
    /// Whether the latest record succeeded
    pub is_available: bool,
    /// Available and above the healthy threshold
    pub is_healthy: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ServiceStatistics {
    pub fn new(service: impl Into<String>, critical: bool) -> Self {
        Self {
            service: service.into(),
            critical,
            total_attempts: 0,
            successes: 0,
            fallback_uses: 0,
            success_rate: 0.0,
            avg_response_time_ms: 0.0,
            fallback_usage_rate: 0.0,
            is_available: false,
            is_healthy: false,
            last_checked: None,
            last_error: None,
        }
    }

    /// Fold one record into the aggregate
    pub fn record(&mut self, record: &ResilienceRecord, healthy_threshold: f64) {
        self.total_attempts += 1;
        if record.success {
            self.successes += 1;
        } else {
            self.last_error = record.error_message.clone();
        }
        if record.fallback_used {
            self.fallback_uses += 1;
        }

        let n = self.total_attempts as f64;
        self.success_rate = self.successes as f64 / n;
        self.fallback_usage_rate = self.fallback_uses as f64 / n;
        self.avg_response_time_ms += (record.response_time_ms as f64 - self.avg_response_time_ms) / n;

        self.is_available = record.success;
        self.is_healthy = self.is_available && self.success_rate > healthy_threshold;
        self.last_checked = Some(record.timestamp);
    }
}

/// Aggregate health of every registered service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub timestamp: DateTime<Utc>,
    /// Mean success rate over critical services is above the threshold
    pub system_healthy: bool,
    pub services: Vec<ServiceStatistics>,
}

impl SystemStatus {
    /// Derive the status; critical services without any record are left out of the mean
    pub fn from_services(services: Vec<ServiceStatistics>, healthy_threshold: f64) -> Self {
        let rates: Vec<f64> = services
            .iter()
            .filter(|s| s.critical && s.total_attempts > 0)
            .map(|s| s.success_rate)
            .collect();
        let system_healthy = rates.is_empty()
            || rates.iter().sum::<f64>() / rates.len() as f64 > healthy_threshold;

        Self {
            timestamp: Utc::now(),
            system_healthy,
            services,
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceStatistics> {
        self.services.iter().find(|s| s.service == name)
    }
}

/// On-disk layout of the statistics file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStatistics {
    pub timestamp: DateTime<Utc>,
    pub services: Vec<ServiceStatistics>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(success: bool, ms: u64) -> ResilienceRecord {
        ResilienceRecord {
            service: "svc".into(),
            success,
            response_time_ms: ms,
            fallback_used: !success,
            fallback_service: None,
            error_message: (!success).then(|| "down".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_incremental_average() {
        let mut stats = ServiceStatistics::new("svc", true);
        for ms in [100, 200, 300] {
            stats.record(&record(true, ms), 0.7);
        }
        assert!((stats.avg_response_time_ms - 200.0).abs() < 1e-9);
        assert!(stats.is_healthy);
    }

    #[test]
    fn test_last_failure_makes_unavailable() {
        let mut stats = ServiceStatistics::new("svc", true);
        stats.record(&record(true, 10), 0.7);
        stats.record(&record(false, 10), 0.7);
        assert!(!stats.is_available);
        assert!(!stats.is_healthy);
        assert_eq!(stats.last_error.as_deref(), Some("down"));
        assert_eq!(stats.fallback_usage_rate, 0.5);
    }

    #[test]
    fn test_system_health_uses_critical_only() {
        let mut critical = ServiceStatistics::new("llm", true);
        critical.record(&record(true, 1), 0.7);
        let mut optional = ServiceStatistics::new("pexels", false);
        optional.record(&record(false, 1), 0.7);

        let status = SystemStatus::from_services(vec![critical.clone(), optional], 0.7);
        assert!(status.system_healthy);

        critical.record(&record(false, 1), 0.7);
        let status = SystemStatus::from_services(vec![critical], 0.7);
        // 0.5 is not above 0.7
        assert!(!status.system_healthy);
    }

    proptest! {
        #[test]
        fn prop_success_rate_is_exact(outcomes in proptest::collection::vec(any::<bool>(), 1..200)) {
            let mut stats = ServiceStatistics::new("svc", false);
            for ok in &outcomes {
                stats.record(&record(*ok, 5), 0.7);
            }
            let k = outcomes.iter().filter(|ok| **ok).count() as f64;
            let n = outcomes.len() as f64;
            prop_assert_eq!(stats.total_attempts, outcomes.len() as u64);
            prop_assert_eq!(stats.success_rate, k / n);
        }
    }
}
