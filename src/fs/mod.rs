//! Physical file operations behind the lock store.
//!
//! [`LockFileSystem`] is the narrow set of operations the lock store needs.
//! Everything returns `io::Result` untouched; interpreting a failure (missing
//! file, sharing violation, lost race) is the lock store's job.

pub mod atomic;

pub use atomic::{atomic_create_new, atomic_write};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// File operations used by the lock store.
pub trait LockFileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Open for reading without sharing and return the full content.
    ///
    /// Fails with `NotFound` when absent and with another kind (typically
    /// `WouldBlock` or a sharing violation) when someone else holds the file.
    fn read_exclusive(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create the file, failing with `AlreadyExists` if it is present.
    fn create_new(&self, path: &Path, content: &[u8]) -> io::Result<()>;

    /// Replace the content of an existing file.
    fn overwrite(&self, path: &Path, content: &[u8]) -> io::Result<()>;

    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Creation time, or the modification time where birth time is unavailable.
    fn creation_time(&self, path: &Path) -> io::Result<DateTime<Utc>>;
}

/// The real filesystem.
///
/// Files are opened with share mode 0 on Windows. On every platform an
/// advisory exclusive lock (`fs2`) is held on the handle while a record is
/// read. New files are published with a hard link; filesystems without
/// links get an exclusive create written under the advisory lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhysicalFileSystem;

impl PhysicalFileSystem {
    fn exclusive_options() -> OpenOptions {
        #[allow(unused_mut)]
        let mut options = OpenOptions::new();
        #[cfg(windows)]
        {
            use std::os::windows::fs::OpenOptionsExt;
            options.share_mode(0);
        }
        options
    }
}

impl LockFileSystem for PhysicalFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_exclusive(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut file = Self::exclusive_options().read(true).open(path)?;
        file.try_lock_exclusive()?;

        let mut content = Vec::new();
        let result = file.read_to_end(&mut content);
        let _ = FileExt::unlock(&file);
        result.map(|_| content)
    }

    fn create_new(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }

        match atomic_create_new(path, content) {
            Err(e) if e.kind() == io::ErrorKind::Unsupported => {}
            result => return result,
        }

        let mut file = Self::exclusive_options()
            .write(true)
            .create_new(true)
            .open(path)?;

        // Readers only hold the lock for the duration of a read.
        let result = file
            .lock_exclusive()
            .and_then(|_| write_and_sync(&mut file, content));
        let _ = FileExt::unlock(&file);

        if result.is_err() {
            drop(file);
            let _ = fs::remove_file(path);
        }
        result
    }

    fn overwrite(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        atomic_write(path, content)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn creation_time(&self, path: &Path) -> io::Result<DateTime<Utc>> {
        let metadata = fs::metadata(path)?;
        let time = metadata.created().or_else(|_| metadata.modified())?;
        Ok(DateTime::<Utc>::from(time))
    }
}

fn write_and_sync(file: &mut File, content: &[u8]) -> io::Result<()> {
    file.write_all(content)?;
    file.sync_all()
}
