//! Persistence error type

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure reading or writing a snapshot, record or blob
///
/// The schedulers log these and carry on with their in-memory state.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// File system failure at a known path
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot content could not be (de)serialized
    #[error("Snapshot format error at {}: {source}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Record or blob does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Blob store refused the artifact
    #[error("Upload failed: {0}")]
    Upload(String),
}

impl PersistenceError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn format(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        Self::Format {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
