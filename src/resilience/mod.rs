//! Dependency health monitoring
//!
//! ```text
//! register(service, probe, critical)
//!        │
//!  start(interval) ──▶ run_all ──▶ probe 1 → probe 2 → … (sequential)
//!                          │
//!                          ├─▶ rolling history (last N per service)
//!                          ├─▶ ServiceStatistics (incremental)
//!                          └─▶ resilience_stats.json
//! ```

mod monitor;
mod probe;
mod stats;

pub use monitor::{MonitorConfig, ResilienceMonitor};
pub use probe::{FnProbe, HttpProbe, Probe, ProbeOutcome};
pub use stats::{PersistedStatistics, ResilienceRecord, ServiceStatistics, SystemStatus};
