//! Error type for external provider calls

use std::time::Duration;
use thiserror::Error;

/// Any failure from an external provider call.
///
/// Always recoverable from the point of view of a [`ProviderChain`]:
/// it advances the chain to the next provider.
///
/// [`ProviderChain`]: crate::provider::ProviderChain
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport-level HTTP failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status code
    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response could not be understood
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Attempt exceeded the chain's deadline
    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Provider has no credentials or endpoint configured
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Local process or I/O failure inside a provider
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Create a malformed-response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Create a generic provider error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this failure was a deadline expiry
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = ProviderError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timed out after 1500ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: ProviderError = json_err.into();
        assert!(matches!(err, ProviderError::Malformed(_)));
        assert!(!err.is_timeout());
    }
}
