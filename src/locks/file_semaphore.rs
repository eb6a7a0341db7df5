//! Lock-file based semaphore engine.
//!
//! Each attempt reads the lock file, judges what it found, and either backs
//! off or writes its own record. Waiting is a polling loop around
//! [`LockFileSemaphore::try_acquire`].

use super::io::{LockIo, validate_lock_name};
use super::outcome::LockReadOutcome;
use super::process::ProcessFinder;
use super::record::LockRecord;
use crate::error::Result;
use crate::log::Log;
use chrono::{TimeDelta, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Delay between attempts while waiting for a lock file.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What an attempt should do about the current lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireLockAction {
    DontAcquireLock,
    AcquireLock,
    /// Delete the current file before writing our own record.
    ForciblyAcquireLock,
}

/// Judgement of a lock read outcome against liveness and the lock timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAssessment {
    /// No lock file.
    Free,
    /// The calling thread already holds the lock.
    Reentrant,
    /// Another process has the file open exclusively.
    HeldExclusively,
    /// Unreadable file younger than the lock timeout.
    CorruptWithinTimeout,
    /// Unreadable file older than the lock timeout.
    CorruptExpired,
    /// Held by a running owner within the lock timeout.
    Busy(LockRecord),
    /// The owner is no longer running.
    Abandoned(LockRecord),
    /// Held by a running owner for longer than the lock timeout.
    Expired(LockRecord),
}

impl LockAssessment {
    pub fn action(&self) -> AcquireLockAction {
        match self {
            LockAssessment::Free | LockAssessment::Reentrant | LockAssessment::Abandoned(_) => {
                AcquireLockAction::AcquireLock
            }
            LockAssessment::CorruptExpired | LockAssessment::Expired(_) => {
                AcquireLockAction::ForciblyAcquireLock
            }
            LockAssessment::HeldExclusively
            | LockAssessment::CorruptWithinTimeout
            | LockAssessment::Busy(_) => AcquireLockAction::DontAcquireLock,
        }
    }

    /// Warning emitted when an attempt acts on this assessment.
    pub fn warning(&self) -> Option<String> {
        match self {
            LockAssessment::CorruptExpired => Some(
                "Lock file existed but was not readable, and has existed for longer than lock timeout. Taking lock."
                    .to_string(),
            ),
            LockAssessment::Abandoned(record) => Some(format!(
                "Process {}, thread {} had lock, but appears to have crashed. Taking lock.",
                record.process_id, record.thread_id
            )),
            LockAssessment::Expired(record) => Some(format!(
                "Forcibly taking lock from process {}, thread {} as lock has timed out. If this happens regularly, investigate the process holding the lock.",
                record.process_id, record.thread_id
            )),
            _ => None,
        }
    }

    /// The stale file has to go before a create-new can succeed.
    fn requires_removal(&self) -> bool {
        matches!(
            self,
            LockAssessment::Abandoned(_) | LockAssessment::Expired(_) | LockAssessment::CorruptExpired
        )
    }
}

impl fmt::Display for LockAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockAssessment::Free => write!(f, "free"),
            LockAssessment::Reentrant => write!(f, "held by this thread"),
            LockAssessment::HeldExclusively => write!(f, "busy (file open exclusively)"),
            LockAssessment::CorruptWithinTimeout => write!(f, "busy (unreadable, within timeout)"),
            LockAssessment::CorruptExpired => write!(f, "reclaimable (unreadable, timed out)"),
            LockAssessment::Busy(_) => write!(f, "busy (owner running)"),
            LockAssessment::Abandoned(_) => write!(f, "reclaimable (owner not running)"),
            LockAssessment::Expired(_) => write!(f, "reclaimable (owner timed out)"),
        }
    }
}

/// Cross-process semaphore backed by `<lock dir>/<name>.lck`.
pub struct LockFileSemaphore {
    name: String,
    lock_file_path: PathBuf,
    lock_timeout: Duration,
    poll_interval: Duration,
    lock_io: Arc<dyn LockIo>,
    process_finder: Arc<dyn ProcessFinder>,
    log: Arc<dyn Log>,
}

impl LockFileSemaphore {
    /// Create a semaphore for `name`.
    ///
    /// # Arguments
    ///
    /// * `name` - Lock name, used as the lock file stem
    /// * `lock_timeout` - Age after which a live owner's lock is taken anyway
    ///
    /// # Returns
    ///
    /// * `Err(SemaphoreError::InvalidName)` - The name is empty or contains a
    ///   path separator
    pub fn new(
        name: &str,
        lock_timeout: Duration,
        lock_io: Arc<dyn LockIo>,
        process_finder: Arc<dyn ProcessFinder>,
        log: Arc<dyn Log>,
    ) -> Result<Self> {
        validate_lock_name(name)?;

        Ok(Self {
            name: name.to_string(),
            lock_file_path: lock_io.path_for(name),
            lock_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            lock_io,
            process_finder,
            log,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock_file_path(&self) -> &Path {
        &self.lock_file_path
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Judge an outcome without logging.
    pub fn assess(&self, outcome: &LockReadOutcome) -> LockAssessment {
        match outcome {
            LockReadOutcome::Missing => LockAssessment::Free,
            LockReadOutcome::Owned(_) => LockAssessment::Reentrant,
            LockReadOutcome::HeldExclusivelyElsewhere => LockAssessment::HeldExclusively,
            LockReadOutcome::Corrupt { created_at } => {
                if self.exceeds_timeout(Utc::now().signed_duration_since(*created_at)) {
                    LockAssessment::CorruptExpired
                } else {
                    LockAssessment::CorruptWithinTimeout
                }
            }
            LockReadOutcome::HeldByOther(record) => {
                if !self
                    .process_finder
                    .is_running(record.process_id, &record.process_name)
                {
                    LockAssessment::Abandoned(record.clone())
                } else if self.exceeds_timeout(record.age().abs()) {
                    LockAssessment::Expired(record.clone())
                } else {
                    LockAssessment::Busy(record.clone())
                }
            }
        }
    }

    /// Decide what to do about `outcome`, logging any reclamation warning.
    pub fn should_acquire_lock(&self, outcome: &LockReadOutcome) -> AcquireLockAction {
        let assessment = self.assess(outcome);
        if let Some(warning) = assessment.warning() {
            self.log.warn(&warning);
        }
        assessment.action()
    }

    /// One acquisition attempt; `true` if the calling thread now holds the lock.
    pub fn try_acquire(&self) -> bool {
        let outcome = self.lock_io.read(&self.lock_file_path);
        let assessment = self.assess(&outcome);
        let action = assessment.action();

        if action == AcquireLockAction::DontAcquireLock {
            return false;
        }

        if let Some(warning) = assessment.warning() {
            self.log.warn(&warning);
        }

        if assessment.requires_removal() && !self.remove_stale(&outcome) {
            return false;
        }

        self.lock_io
            .write(&self.lock_file_path, &LockRecord::for_current_thread())
    }

    /// Delete the stale file, unless someone replaced it since it was read.
    fn remove_stale(&self, seen: &LockReadOutcome) -> bool {
        if let Some(stale) = seen.record() {
            match self.lock_io.read(&self.lock_file_path).record() {
                Some(current) if current == stale && current.timestamp == stale.timestamp => {}
                None if !self.lock_io.exists(&self.lock_file_path) => return true,
                _ => return false,
            }
        }

        self.lock_io.delete(&self.lock_file_path);
        true
    }

    /// Block until the lock is acquired.
    pub fn wait_indefinitely(&self) {
        while !self.try_acquire() {
            thread::sleep(self.poll_interval);
        }
    }

    /// Poll for at most `max_wait`; `false` if the lock was not acquired.
    ///
    /// When the wait runs out the lock file is read once more, so a claim
    /// whose confirmation was blocked by a concurrent reader is still
    /// reported as held.
    pub fn wait_with_timeout(&self, max_wait: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(max_wait) else {
            self.wait_indefinitely();
            return true;
        };

        loop {
            if self.try_acquire() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                // A write whose confirmation read was blocked may still have won.
                return matches!(
                    self.lock_io.read_settled(&self.lock_file_path),
                    LockReadOutcome::Owned(_)
                );
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Delete the lock file if the calling thread holds it.
    ///
    /// Anything else, including a lock taken over by another claimant after
    /// a forced reclaim, is left untouched.
    pub fn release(&self) {
        match self.lock_io.read_settled(&self.lock_file_path) {
            LockReadOutcome::Owned(_) => self.lock_io.delete(&self.lock_file_path),
            LockReadOutcome::Missing => {}
            LockReadOutcome::HeldExclusivelyElsewhere => self.log.warn(&format!(
                "Could not release lock '{}': the lock file stayed open in another process. It will be reclaimed once it times out.",
                self.name
            )),
            other => self.log.verbose(&format!(
                "Not releasing lock '{}': {}",
                self.name, other
            )),
        }
    }

    fn exceeds_timeout(&self, age: TimeDelta) -> bool {
        let limit = TimeDelta::from_std(self.lock_timeout).unwrap_or(TimeDelta::MAX);
        age > limit
    }
}

impl fmt::Debug for LockFileSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFileSemaphore")
            .field("name", &self.name)
            .field("lock_file_path", &self.lock_file_path)
            .field("lock_timeout", &self.lock_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
