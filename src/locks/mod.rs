//! Cross-process named locks.
//!
//! Independent processes on one machine coordinate exclusive access to a
//! named resource through either a native OS primitive or a lock file.
//!
//! # Lock Files
//!
//! Lock files live at `<lock dir>/<name>.lck` (the system temp directory by
//! default). They are created with **create_new** semantics and hold a JSON
//! record of the owner:
//! - `ProcessId`: owner process id
//! - `ProcessName`: owner image name (pids are reused)
//! - `ThreadId`: process-local thread id
//! - `Timestamp`: acquisition time in 100 ns ticks since 0001-01-01 UTC
//!
//! A lock whose owner is no longer running is taken immediately. A lock
//! held longer than the lock timeout is taken forcibly, with a warning.
//!
//! # RAII Guards
//!
//! [`SemaphoreFactory::acquire`] returns a [`SemaphoreGuard`] that releases
//! the lock when dropped. If releasing fails during drop, a warning is logged
//! but the program does not crash.

pub mod factory;
pub mod file_semaphore;
mod guard;
pub mod io;
pub mod native;
pub mod outcome;
pub mod process;
pub mod record;
mod retry;


// Re-export public API
pub use factory::{Backend, SemaphoreFactory, select_backend};
pub use file_semaphore::{AcquireLockAction, DEFAULT_POLL_INTERVAL, LockAssessment, LockFileSemaphore};
pub use guard::SemaphoreGuard;
pub use io::{FileLockIo, LOCK_FILE_EXTENSION, LockIo, validate_lock_name};
pub use native::{NativeSemaphore, NativeSupport, WaitOutcome};
pub use outcome::LockReadOutcome;
pub use process::{NameMatching, ProcessFinder, SystemProcessFinder};
pub use record::{LockIdentity, LockRecord};
