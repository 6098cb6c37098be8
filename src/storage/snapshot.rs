//! Whole-file JSON snapshots written atomically
//!
//! Every save serializes the full state to its own `<file>.<uuid>.tmp` and
//! renames it over the target, so a crash mid-write leaves the previous
//! snapshot intact and concurrent writers never share a temp file.
//! Callers that save from several tasks hold one lock across clone and save.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::PersistenceError;

/// One snapshot file on disk
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        self.path.with_file_name(name)
    }

    /// Serialize `state` and atomically replace the file
    pub fn save<T: Serialize + ?Sized>(&self, state: &T) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let temp_path = self.temp_path();
        let written = Self::write_temp(&temp_path, state)
            .and_then(|()| {
                fs::rename(&temp_path, &self.path).map_err(|e| PersistenceError::io(&self.path, e))
            });
        if written.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        written?;

        tracing::debug!(path = %self.path.display(), "Snapshot saved");
        Ok(())
    }

    fn write_temp<T: Serialize + ?Sized>(
        temp_path: &Path,
        state: &T,
    ) -> Result<(), PersistenceError> {
        let file = File::create(temp_path).map_err(|e| PersistenceError::io(temp_path, e))?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, state)
            .map_err(|e| PersistenceError::format(temp_path, e))?;
        writer
            .flush()
            .map_err(|e| PersistenceError::io(temp_path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| PersistenceError::io(temp_path, e))
    }

    /// Load the snapshot; `Ok(None)` when the file does not exist
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, PersistenceError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };

        let state = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| PersistenceError::format(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), "Snapshot loaded");
        Ok(Some(state))
    }
}
