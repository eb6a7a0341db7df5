//! Lock store: reading, writing and deleting lock records.
//!
//! Without a compare-and-swap primitive on plain files, `write` uses
//! create-new semantics followed by a read-back: whoever's record is on disk
//! afterwards won. Losing a race is a `false` return, never an error.

use super::outcome::LockReadOutcome;
use super::record::{LockIdentity, LockRecord};
use super::retry::with_retry;
use crate::error::{Result, SemaphoreError};
use crate::fs::LockFileSystem;
use crate::log::Log;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lock file extension.
pub const LOCK_FILE_EXTENSION: &str = "lck";

/// Storage of lock records keyed by lock name.
pub trait LockIo: Send + Sync {
    /// Path of the lock file for `name`.
    fn path_for(&self, name: &str) -> PathBuf;

    fn exists(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> LockReadOutcome;

    /// `read`, retried with backoff while another handle has the file open.
    ///
    /// Pollers hold the file only for the length of a read, so a
    /// `HeldExclusivelyElsewhere` that persists through every retry is
    /// returned as is.
    fn read_settled(&self, path: &Path) -> LockReadOutcome {
        with_retry(
            || match self.read(path) {
                LockReadOutcome::HeldExclusivelyElsewhere => {
                    Err(LockReadOutcome::HeldExclusivelyElsewhere)
                }
                outcome => Ok(outcome),
            },
            |_, _| {},
        )
        .unwrap_or_else(|outcome| outcome)
    }

    /// Persist `record`; `true` only if it is the record on disk afterwards.
    fn write(&self, path: &Path, record: &LockRecord) -> bool;

    /// Best-effort delete.
    fn delete(&self, path: &Path);
}

/// Reject names that cannot be used as a file stem or native object name.
pub fn validate_lock_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SemaphoreError::InvalidName(
            name.to_string(),
            "name cannot be empty".to_string(),
        ));
    }

    if name.contains(['/', '\\']) {
        return Err(SemaphoreError::InvalidName(
            name.to_string(),
            "name cannot contain a path separator".to_string(),
        ));
    }

    if name.chars().any(|c| c.is_control()) || name == "." || name == ".." {
        return Err(SemaphoreError::InvalidName(
            name.to_string(),
            "name is not a valid file name".to_string(),
        ));
    }

    Ok(())
}

/// Lock store backed by `<directory>/<name>.lck` files.
pub struct FileLockIo {
    directory: PathBuf,
    fs: Arc<dyn LockFileSystem>,
    log: Arc<dyn Log>,
}

impl FileLockIo {
    pub fn new(directory: PathBuf, fs: Arc<dyn LockFileSystem>, log: Arc<dyn Log>) -> Self {
        Self { directory, fs, log }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Parse file content and classify it relative to the calling thread.
    fn classify(&self, path: &Path, content: &[u8]) -> LockReadOutcome {
        match LockRecord::from_json(content) {
            Ok(record) if record.identity() == LockIdentity::current() => {
                LockReadOutcome::Owned(record)
            }
            Ok(record) => LockReadOutcome::HeldByOther(record),
            Err(e) => {
                self.log.verbose(&format!(
                    "Lock file '{}' could not be parsed: {}",
                    path.display(),
                    e
                ));
                let created_at = self.fs.creation_time(path).unwrap_or_else(|_| Utc::now());
                LockReadOutcome::Corrupt { created_at }
            }
        }
    }
}

impl LockIo for FileLockIo {
    fn path_for(&self, name: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{}", name, LOCK_FILE_EXTENSION))
    }

    fn exists(&self, path: &Path) -> bool {
        self.fs.exists(path)
    }

    fn read(&self, path: &Path) -> LockReadOutcome {
        match self.fs.read_exclusive(path) {
            Ok(content) => self.classify(path, &content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => LockReadOutcome::Missing,
            Err(e) => {
                self.log.verbose(&format!(
                    "Lock file '{}' could not be opened: {}",
                    path.display(),
                    e
                ));
                LockReadOutcome::HeldExclusivelyElsewhere
            }
        }
    }

    fn write(&self, path: &Path, record: &LockRecord) -> bool {
        let content = match record.to_json() {
            Ok(content) => content,
            Err(e) => {
                self.log.verbose(&format!("Failed to serialize lock record: {}", e));
                return false;
            }
        };

        if self.fs.exists(path) {
            match self.read(path) {
                LockReadOutcome::Owned(current) | LockReadOutcome::HeldByOther(current)
                    if current == *record =>
                {
                    if current.timestamp == record.timestamp {
                        return true;
                    }
                    if let Err(e) = self.fs.overwrite(path, &content) {
                        self.log.verbose(&format!(
                            "Failed to refresh lock file '{}': {}",
                            path.display(),
                            e
                        ));
                        return false;
                    }
                    return self.read_settled(path).record() == Some(record);
                }
                LockReadOutcome::Corrupt { .. } => self.delete(path),
                _ => {}
            }
        }

        if let Err(e) = self.fs.create_new(path, &content) {
            self.log.verbose(&format!(
                "Failed to create lock file '{}': {}",
                path.display(),
                e
            ));
            return false;
        }

        // Another writer may have replaced the file between our create and now.
        self.read_settled(path).record() == Some(record)
    }

    fn delete(&self, path: &Path) {
        if let Err(e) = self.fs.delete(path)
            && e.kind() != io::ErrorKind::NotFound
        {
            self.log.verbose(&format!(
                "Failed to delete lock file '{}': {}",
                path.display(),
                e
            ));
        }
    }
}
