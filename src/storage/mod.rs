//! Persistence collaborators
//!
//! Snapshot files for scheduler state, a record repository abstraction and
//! a blob store for rendered artifacts.

mod blob;
mod error;
pub mod repository;
mod snapshot;

pub use blob::{BlobStore, LocalBlobStore};
pub use error::PersistenceError;
pub use repository::{MemoryRepository, Record, Repository, SnapshotRepository};
pub use snapshot::SnapshotFile;
