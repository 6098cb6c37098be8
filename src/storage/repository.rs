//! Record repositories
//!
//! Schedulers own their state in memory; a [`Repository`] mirrors it to
//! whatever store the application wires in.
//!
//! ```text
//! JobScheduler / PostScheduler
//!            │
//!            ▼
//!     Repository<T> trait
//!       ┌────┴────────────┐
//!       ▼                 ▼
//! MemoryRepository  SnapshotRepository
//!                   (JSON array on disk)
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::RwLock;

use super::{PersistenceError, SnapshotFile};

// ============================================================================
// Traits
// ============================================================================

/// Anything with a stable string identifier
pub trait Record: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
}

/// CRUD operations over one record type
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<T>, PersistenceError>;

    /// All records in insertion order
    async fn list(&self) -> Result<Vec<T>, PersistenceError>;

    async fn create(&self, record: T) -> Result<(), PersistenceError>;

    /// Replace an existing record; `NotFound` when the id is unknown
    async fn update(&self, record: T) -> Result<(), PersistenceError>;

    /// Remove a record; `false` when it was not there
    async fn delete(&self, id: &str) -> Result<bool, PersistenceError>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// Repository backed by a vector; used in tests and when nothing is persisted
pub struct MemoryRepository<T> {
    records: RwLock<Vec<T>>,
}

impl<T> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert<T: Record>(records: &mut Vec<T>, record: T, must_exist: bool) -> Result<(), PersistenceError> {
    match records.iter_mut().find(|r| r.id() == record.id()) {
        Some(slot) => *slot = record,
        None if must_exist => return Err(PersistenceError::NotFound(record.id().to_string())),
        None => records.push(record),
    }
    Ok(())
}

fn remove<T: Record>(records: &mut Vec<T>, id: &str) -> bool {
    let before = records.len();
    records.retain(|r| r.id() != id);
    records.len() != before
}

#[async_trait]
impl<T: Record> Repository<T> for MemoryRepository<T> {
    async fn get(&self, id: &str) -> Result<Option<T>, PersistenceError> {
        Ok(self.records.read().await.iter().find(|r| r.id() == id).cloned())
    }

    async fn list(&self) -> Result<Vec<T>, PersistenceError> {
        Ok(self.records.read().await.clone())
    }

    async fn create(&self, record: T) -> Result<(), PersistenceError> {
        upsert(&mut *self.records.write().await, record, false)
    }

    async fn update(&self, record: T) -> Result<(), PersistenceError> {
        upsert(&mut *self.records.write().await, record, true)
    }

    async fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
        Ok(remove(&mut *self.records.write().await, id))
    }
}

// ============================================================================
// Snapshot-file implementation
// ============================================================================

/// Repository that rewrites a JSON array snapshot after every mutation
///
/// The in-memory copy stays authoritative: a failed write is returned to the
/// caller but the mutation is kept.
pub struct SnapshotRepository<T> {
    records: RwLock<Vec<T>>,
    file: SnapshotFile,
}

impl<T> SnapshotRepository<T>
where
    T: Record + Serialize + DeserializeOwned,
{
    /// Open the snapshot at `path`, loading existing records if present
    ///
    /// An unreadable snapshot is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let file = SnapshotFile::new(path);
        let records: Vec<T> = match file.load() {
            Ok(loaded) => loaded.unwrap_or_default(),
            Err(e @ PersistenceError::Format { .. }) => {
                tracing::warn!(error = %e, "Snapshot unreadable, starting empty");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(
            path = %file.path().display(),
            records = records.len(),
            "Opened snapshot repository"
        );
        Ok(Self {
            records: RwLock::new(records),
            file,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }
}

#[async_trait]
impl<T> Repository<T> for SnapshotRepository<T>
where
    T: Record + Serialize + DeserializeOwned,
{
    async fn get(&self, id: &str) -> Result<Option<T>, PersistenceError> {
        Ok(self.records.read().await.iter().find(|r| r.id() == id).cloned())
    }

    async fn list(&self) -> Result<Vec<T>, PersistenceError> {
        Ok(self.records.read().await.clone())
    }

    async fn create(&self, record: T) -> Result<(), PersistenceError> {
        let mut records = self.records.write().await;
        upsert(&mut records, record, false)?;
        self.file.save(&*records)
    }

    async fn update(&self, record: T) -> Result<(), PersistenceError> {
        let mut records = self.records.write().await;
        upsert(&mut records, record, true)?;
        self.file.save(&*records)
    }

    async fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
        let mut records = self.records.write().await;
        if !remove(&mut records, id) {
            return Ok(false);
        }
        self.file.save(&*records)?;
        Ok(true)
    }
}
