//! Snapshot backups
//!
//! A backup is a directory under `backup_dir` holding a copy of every
//! top-level file of `data_dir` plus a `manifest.json` describing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::storage::{PersistenceError, SnapshotFile};

const MANIFEST: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Invalid backup name '{0}'")]
    InvalidName(String),

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Backup already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Description of one backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<String>,
}

pub struct BackupManager {
    data_dir: PathBuf,
    backup_dir: PathBuf,
}

impl BackupManager {
    pub fn new(data_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            backup_dir: backup_dir.into(),
        }
    }

    /// Copy the snapshot files into `backup_dir/<name>` (default `backup_YYYYmmdd_HHMMSS`)
    pub fn create(&self, name: Option<&str>) -> Result<BackupInfo, BackupError> {
        let created_at = Utc::now();
        let name = match name {
            Some(name) => validate_name(name)?,
            None => format!("backup_{}", created_at.format("%Y%m%d_%H%M%S")),
        };
        let target = self.backup_dir.join(&name);
        if target.exists() {
            return Err(BackupError::AlreadyExists(name));
        }
        fs::create_dir_all(&target).map_err(|e| PersistenceError::io(&target, e))?;

        let mut files = Vec::new();
        for source in snapshot_files(&self.data_dir)? {
            let Some(file_name) = source.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            let dest = target.join(&file_name);
            fs::copy(&source, &dest).map_err(|e| PersistenceError::io(&dest, e))?;
            files.push(file_name);
        }
        files.sort();

        let info = BackupInfo {
            name,
            created_at,
            files,
        };
        SnapshotFile::new(target.join(MANIFEST)).save(&info)?;
        tracing::info!(
            backup = %info.name,
            files = info.files.len(),
            path = %target.display(),
            "Backup created"
        );
        Ok(info)
    }

    /// Every backup, oldest first
    pub fn list(&self) -> Result<Vec<BackupInfo>, BackupError> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.backup_dir).map_err(|e| PersistenceError::io(&self.backup_dir, e))?;

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PersistenceError::io(&self.backup_dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match read_info(&path) {
                Ok(info) => backups.push(info),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable backup"),
            }
        }
        backups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(backups)
    }

    /// Copy the files of backup `name` back into `data_dir`
    pub fn restore(&self, name: &str) -> Result<BackupInfo, BackupError> {
        let name = validate_name(name)?;
        let source = self.backup_dir.join(&name);
        if !source.is_dir() {
            return Err(BackupError::NotFound(name));
        }
        let info = read_info(&source)?;

        fs::create_dir_all(&self.data_dir).map_err(|e| PersistenceError::io(&self.data_dir, e))?;
        for file in &info.files {
            let from = source.join(file);
            let staged = self.data_dir.join(format!("{file}.restore"));
            let dest = self.data_dir.join(file);
            fs::copy(&from, &staged).map_err(|e| PersistenceError::io(&from, e))?;
            fs::rename(&staged, &dest).map_err(|e| PersistenceError::io(&dest, e))?;
        }

        tracing::info!(backup = %name, files = info.files.len(), "Backup restored");
        Ok(info)
    }
}

fn validate_name(name: &str) -> Result<String, BackupError> {
    let trimmed = name.trim();
    let valid = !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(BackupError::InvalidName(name.to_string()))
    }
}

/// Regular top-level files of `dir`, skipping temp files
fn snapshot_files(dir: &Path) -> Result<Vec<PathBuf>, PersistenceError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| PersistenceError::io(dir, e))? {
        let path = entry.map_err(|e| PersistenceError::io(dir, e))?.path();
        let is_temp = path
            .extension()
            .is_some_and(|ext| ext == "tmp" || ext == "restore");
        if path.is_file() && !is_temp {
            files.push(path);
        }
    }
    Ok(files)
}

/// Manifest of a backup, or a description derived from its contents
fn read_info(dir: &Path) -> Result<BackupInfo, PersistenceError> {
    if let Some(info) = SnapshotFile::new(dir.join(MANIFEST)).load::<BackupInfo>()? {
        return Ok(info);
    }

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let created_at = fs::metadata(dir)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .map_err(|e| PersistenceError::io(dir, e))?;
    let mut files: Vec<String> = snapshot_files(dir)?
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    files.sort();

    Ok(BackupInfo {
        name,
        created_at,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> BackupManager {
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("work")).unwrap();
        fs::write(data.join("scheduled_posts.json"), "[]").unwrap();
        fs::write(data.join("resilience_stats.json"), "{}").unwrap();
        fs::write(data.join("jobs.json.tmp"), "partial").unwrap();
        BackupManager::new(data, dir.path().join("backups"))
    }

    #[test]
    fn test_create_copies_snapshot_files() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let info = manager.create(Some("before-upgrade")).unwrap();
        assert_eq!(info.files, vec!["resilience_stats.json", "scheduled_posts.json"]);
        assert!(dir.path().join("backups/before-upgrade/manifest.json").exists());
        assert!(matches!(
            manager.create(Some("before-upgrade")),
            Err(BackupError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_default_name_uses_timestamp() {
        let dir = TempDir::new().unwrap();
        let info = manager(&dir).create(None).unwrap();
        assert!(info.name.starts_with("backup_"));
        assert_eq!(info.name.len(), "backup_20260101_120000".len());
    }

    #[test]
    fn test_list_and_restore() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        tokio_test::assert_ok!(manager.create(Some("a")));

        let posts = dir.path().join("data/scheduled_posts.json");
        fs::write(&posts, r#"[{"broken": true}]"#).unwrap();

        let listed = tokio_test::assert_ok!(manager.list());
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a");

        tokio_test::assert_ok!(manager.restore("a"));
        assert_eq!(fs::read_to_string(&posts).unwrap(), "[]");
    }

    #[test]
    fn test_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert!(matches!(manager.restore("../etc"), Err(BackupError::InvalidName(_))));
        assert!(matches!(manager.restore("missing"), Err(BackupError::NotFound(_))));
        assert!(matches!(manager.create(Some("")), Err(BackupError::InvalidName(_))));
    }

    #[test]
    fn test_list_without_backups() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path().join("data"), dir.path().join("none"));
        assert!(manager.list().unwrap().is_empty());
    }
}
