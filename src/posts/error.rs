//! Post scheduler and publisher errors

use thiserror::Error;

use super::PostStatus;
use crate::error::ValidationError;
use crate::storage::PersistenceError;

/// Errors returned by [`PostScheduler`](super::PostScheduler) operations
#[derive(Error, Debug)]
pub enum PostError {
    #[error("Post not found: {0}")]
    NotFound(String),

    #[error("Post {id} is {status} and can no longer be cancelled")]
    NotCancellable { id: String, status: PostStatus },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Failure publishing to one account
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("No publisher registered for platform '{0}'")]
    NoPublisher(String),

    #[error("Platform rejected the post ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl PublishError {
    /// Whether trying again later could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            PublishError::NoPublisher(_) => false,
            PublishError::Rejected { status, .. } => *status == 429 || *status >= 500,
            PublishError::Http(_) | PublishError::Other(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        assert!(!PublishError::NoPublisher("x".into()).is_recoverable());
        assert!(!PublishError::Rejected {
            status: 400,
            message: "bad".into()
        }
        .is_recoverable());
        assert!(PublishError::Rejected {
            status: 429,
            message: "slow down".into()
        }
        .is_recoverable());
        assert!(PublishError::Rejected {
            status: 502,
            message: "gateway".into()
        }
        .is_recoverable());
    }
}
