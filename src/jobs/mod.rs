//! Video job scheduling
//!
//! [`JobScheduler`] owns an in-memory FIFO of [`Job`]s consumed by a bounded
//! worker pool; each worker runs the [`JobPipeline`] for one job.

mod error;
mod model;
mod pipeline;
mod scheduler;

pub use error::JobError;
pub use model::{Job, JobEvent, JobStage, JobStatus, VideoJobRequest, MAX_DURATION_SECS};
pub use pipeline::{JobPipeline, PipelineError, PipelineOutput, ProgressSink};
pub use scheduler::{JobScheduler, JobSchedulerConfig, JobSchedulerConfigBuilder};
