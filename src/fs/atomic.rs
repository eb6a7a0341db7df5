//! Atomic file replacement used when a claimant refreshes its own lock file.
//!
//! All atomic writes follow this pattern:
//! 1. Write content to a temporary file in the same directory
//! 2. Sync the file to disk (fsync)
//! 3. Rename the temporary file over the target
//!
//! A concurrent reader therefore observes either the previous record or the
//! new one, never a truncated file that would read back as corrupt.
//!
//! [`atomic_create_new`] applies the same idea to creation: the content is
//! written to a temporary file which is then hard-linked into place, so the
//! target appears fully written or not at all.
//!
//! # Cross-Platform Behavior
//!
//! - **POSIX (Linux, macOS)**: `rename()` is atomic if source and destination
//!   are on the same filesystem.
//! - **Windows**: `std::fs::rename` maps to `MoveFileExW` with
//!   `MOVEFILE_REPLACE_EXISTING`. It fails while another process holds the
//!   target open without sharing, which callers treat as a lost race.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Atomically replace `path` with `content`.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> io::Result<()> {
    let path = path.as_ref();

    let temp_path = generate_temp_path(path)?;
    write_and_sync(&temp_path, content)?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    sync_parent_dir(path);
    Ok(())
}

/// Create `path` with `content`, failing with `AlreadyExists` if it exists.
///
/// Returns `Unsupported` when the filesystem cannot hard-link, leaving the
/// caller to fall back to a plain exclusive create.
pub fn atomic_create_new<P: AsRef<Path>>(path: P, content: &[u8]) -> io::Result<()> {
    let path = path.as_ref();

    let temp_path = generate_temp_path(path)?;
    write_and_sync(&temp_path, content)?;

    let linked = fs::hard_link(&temp_path, path);
    let _ = fs::remove_file(&temp_path);

    match linked {
        Ok(()) => {
            sync_parent_dir(path);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) if path.exists() => {
            Err(io::Error::new(io::ErrorKind::AlreadyExists, e))
        }
        Err(e) => Err(io::Error::new(io::ErrorKind::Unsupported, e)),
    }
}

/// Persist the directory entry after a rename.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

/// Temporary file path next to the target.
///
/// The process id and a per-process counter keep concurrent writers of the
/// same name from sharing a temp file: `.{filename}.{pid}.{n}.tmp`.
fn generate_temp_path(target: &Path) -> io::Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid file path"))?;

    let temp_name = format!(
        ".{}.{}.{}.tmp",
        filename,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    Ok(parent.join(temp_name))
}

fn write_and_sync(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;

    let result = file.write_all(content).and_then(|_| file.sync_all());
    if result.is_err() {
        let _ = fs::remove_file(path);
    }
    result
}
