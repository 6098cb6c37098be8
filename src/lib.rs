//! reelforge - Resilient short-video content pipeline
//!
//! Generates scripts and captions through ordered provider chains that always
//! fall back to local templates, renders narrated vertical videos on a bounded
//! worker pool, publishes scheduled social posts with per-account retries and
//! probes every external dependency to report system health.
//!
//! # Architecture
//!
//! - [`provider`] - Ordered fallback chains ending in an infallible local stage
//! - [`cache`] - TTL cache shared by every component, serving stale values once
//! - [`content`] - Script, social copy and topic generation
//! - [`jobs`] - Video job queue and the media → narration → encode → store pipeline
//! - [`posts`] - Scheduled multi-account publication with retries
//! - [`resilience`] - Health probes, rolling history and aggregate statistics
//! - [`app`] - Explicit application context wiring the above from [`config`]
//! - [`server`] - Health and metrics endpoints
//!
//! # Example
//!
//! ```no_run
//! use reelforge::app::AppContext;
//! use reelforge::config::Config;
//! use reelforge::content::ScriptRequest;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = AppContext::new(Config::from_env()?)?;
//!     let script = app
//!         .content()
//!         .generate_script(&ScriptRequest::new("coffee at home"))
//!         .await?;
//!     println!("{} (fallback: {})", script.value.title, script.used_fallback);
//!     Ok(())
//! }
//! ```

// Initialize rust-i18n at crate root level
rust_i18n::i18n!("locales", fallback = "en");

pub mod app;
pub mod backup;
pub mod cache;
pub mod config;
pub mod content;
pub mod encoder;
pub mod error;
pub mod i18n;
pub mod jobs;
pub mod llm;
pub mod media;
pub mod metrics;
pub mod posts;
pub mod provider;
pub mod resilience;
pub mod server;
pub mod soak;
pub mod storage;
pub mod tts;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::app::AppContext;
    pub use crate::config::Config;
    pub use crate::content::{ContentOrchestrator, ContentResult, Script, ScriptRequest};
    pub use crate::error::{Error, ErrorCategory, ForgeErrorTrait, Result};
    pub use crate::jobs::{Job, JobScheduler, JobStatus, VideoJobRequest};
    pub use crate::posts::{PostRequest, PostScheduler, PostStatus};
    pub use crate::provider::{FallbackResult, ProviderChain};
    pub use crate::resilience::{ResilienceMonitor, SystemStatus};
}
