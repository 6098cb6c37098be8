//! Unified error handling for the reelforge crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`ForgeErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Propagation policy
//!
//! Provider errors are absorbed by [`ProviderChain`](crate::provider::ProviderChain)
//! and never reach callers. Encoding errors end a job. Persistence errors are
//! logged by the schedulers and never abort in-memory processing. Validation
//! errors are returned synchronously before any state is touched.

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::encoder::EncodingError;
pub use crate::jobs::JobError;
pub use crate::posts::{PostError, PublishError};
pub use crate::provider::ProviderError;
pub use crate::storage::PersistenceError;

/// Common trait for all reelforge error types
pub trait ForgeErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried or fallen back from)
    fn is_recoverable(&self) -> bool;

    /// Get localized description for user-facing messages
    fn localized_desc(&self) -> String;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// External provider failures (LLM, TTS, stock media, social platforms)
    Provider,
    /// Video encoder failures
    Encoding,
    /// Snapshot and blob storage failures
    Persistence,
    /// Malformed caller input
    Validation,
    /// Job/post queue state errors
    Scheduler,
    /// Configuration errors
    Config,
    /// Transport errors outside a provider
    Network,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get localized description for the category
    pub fn localized_desc(&self) -> String {
        match self {
            Self::Provider => crate::i18n::t!("errors.category.provider").to_string(),
            Self::Encoding => crate::i18n::t!("errors.category.encoding").to_string(),
            Self::Persistence => crate::i18n::t!("errors.category.persistence").to_string(),
            Self::Validation => crate::i18n::t!("errors.category.validation").to_string(),
            Self::Scheduler => crate::i18n::t!("errors.category.scheduler").to_string(),
            Self::Config => crate::i18n::t!("errors.category.config").to_string(),
            Self::Network => crate::i18n::t!("errors.category.network").to_string(),
            Self::Other => crate::i18n::t!("errors.category.other").to_string(),
        }
    }

    /// Stable machine-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Encoding => "encoding",
            Self::Persistence => "persistence",
            Self::Validation => "validation",
            Self::Scheduler => "scheduler",
            Self::Config => "config",
            Self::Network => "network",
            Self::Other => "other",
        }
    }
}

/// Malformed caller input, rejected before any queueing or state mutation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid '{field}': {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    /// A required field is missing or empty
    pub fn missing(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: "is required".to_string(),
        }
    }

    /// A field has an unacceptable value
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Unified error type for the reelforge crate
#[derive(Error, Debug)]
pub enum Error {
    /// Provider call errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Encoder errors
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Snapshot / blob storage errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Caller input errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Job queue errors
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// Post queue errors
    #[error("Post error: {0}")]
    Post(#[from] PostError),

    /// Platform publication errors
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ForgeErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Provider(_) => true,
            Self::Encoding(_) => false,
            Self::Persistence(_) => true, // next save may succeed
            Self::Validation(_) => false,
            Self::Job(e) => matches!(e, JobError::Persistence(_)),
            Self::Post(e) => matches!(e, PostError::Persistence(_)),
            Self::Publish(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn localized_desc(&self) -> String {
        match self {
            Self::Provider(e) => format!("{}: {e}", crate::i18n::t!("errors.provider.error")),
            Self::Encoding(e) => format!("{}: {e}", crate::i18n::t!("errors.encoding.error")),
            Self::Persistence(e) => {
                format!("{}: {e}", crate::i18n::t!("errors.persistence.error"))
            }
            Self::Validation(e) => format!("{}: {e}", crate::i18n::t!("errors.validation.error")),
            Self::Job(e) => format!("{}: {e}", self.category().localized_desc()),
            Self::Post(e) => format!("{}: {e}", self.category().localized_desc()),
            Self::Publish(e) => format!("{}: {e}", self.category().localized_desc()),
            Self::Io(e) => format!("{}: {e}", crate::i18n::t!("errors.io.error")),
            Self::Json(e) => format!("{}: {e}", crate::i18n::t!("errors.json.error")),
            Self::Http(e) => format!("{}: {e}", crate::i18n::t!("errors.http.error")),
            Self::Config(msg) => format!("{}: {msg}", crate::i18n::t!("errors.config.error")),
            Self::Other { context, .. } => context.clone(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Provider(_) | Self::Publish(_) => ErrorCategory::Provider,
            Self::Encoding(_) => ErrorCategory::Encoding,
            Self::Persistence(_) | Self::Io(_) => ErrorCategory::Persistence,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Job(e) => match e {
                JobError::Validation(_) => ErrorCategory::Validation,
                JobError::Persistence(_) => ErrorCategory::Persistence,
                _ => ErrorCategory::Scheduler,
            },
            Self::Post(e) => match e {
                PostError::Validation(_) => ErrorCategory::Validation,
                PostError::Persistence(_) => ErrorCategory::Persistence,
                _ => ErrorCategory::Scheduler,
            },
            Self::Json(_) => ErrorCategory::Persistence,
            Self::Http(_) => ErrorCategory::Network,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_category() {
        let provider_err = Error::Provider(ProviderError::Timeout(Duration::from_secs(5)));
        assert_eq!(provider_err.category(), ErrorCategory::Provider);

        let validation_err = Error::Validation(ValidationError::missing("title"));
        assert_eq!(validation_err.category(), ErrorCategory::Validation);

        let job_err = Error::Job(JobError::NotFound("abc".to_string()));
        assert_eq!(job_err.category(), ErrorCategory::Scheduler);
    }

    #[test]
    fn test_is_recoverable() {
        let provider_err = Error::Provider(ProviderError::other("boom"));
        assert!(provider_err.is_recoverable());

        let encoding_err = Error::Encoding(EncodingError::NoInput("no images".to_string()));
        assert!(!encoding_err.is_recoverable());

        let validation_err = Error::Validation(ValidationError::missing("accounts"));
        assert!(!validation_err.is_recoverable());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::invalid("duration", "must be between 1 and 600 seconds");
        assert_eq!(
            err.to_string(),
            "Invalid 'duration': must be between 1 and 600 seconds"
        );
    }

    #[test]
    fn test_error_conversion() {
        let job_err = JobError::NotFound("job-1".to_string());
        let unified: Error = job_err.into();
        assert!(matches!(unified, Error::Job(_)));
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("max_concurrent_workers must be greater than 0");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.localized_desc(), "Something went wrong");
    }

    #[test]
    fn test_with_source_keeps_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "ffmpeg missing");
        let err = Error::with_source("encoder check", io);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.category(), ErrorCategory::Other);
    }

    #[test]
    #[serial_test::serial(locale)]
    fn test_category_localized_desc() {
        crate::i18n::set_locale("en");
        assert_eq!(ErrorCategory::Provider.localized_desc(), "Provider error");

        crate::i18n::set_locale("pt");
        assert_eq!(ErrorCategory::Provider.localized_desc(), "Erro de provedor");

        crate::i18n::set_locale("en");
    }
}
