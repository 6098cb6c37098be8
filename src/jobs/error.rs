//! Job scheduler errors

use thiserror::Error;

use super::JobStatus;
use crate::error::ValidationError;
use crate::storage::PersistenceError;

/// Errors returned by [`JobScheduler`](super::JobScheduler) operations
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: String, status: JobStatus },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Job scheduler is shutting down")]
    ShuttingDown,
}
