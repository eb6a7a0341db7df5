//! Backend selection and the public acquire entry points.

use super::file_semaphore::LockFileSemaphore;
use super::guard::SemaphoreGuard;
use super::io::{FileLockIo, LockIo, validate_lock_name};
use super::native::{NativeSemaphore, NativeSupport, WaitOutcome};
use super::process::{ProcessFinder, SystemProcessFinder};
use crate::config::{BackendChoice, Config, NativePrimitive};
use crate::error::{Result, SemaphoreError};
use crate::fs::PhysicalFileSystem;
use crate::log::Log;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The mechanism every semaphore from a factory uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Native(NativePrimitive),
    File,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Native(NativePrimitive::Semaphore) => write!(f, "native semaphore"),
            Backend::Native(NativePrimitive::Mutex) => write!(f, "native mutex"),
            Backend::File => write!(f, "lock file"),
        }
    }
}

/// Resolve the configured backend choice against platform support.
pub fn select_backend(
    choice: BackendChoice,
    preferred: NativePrimitive,
    support: NativeSupport,
) -> Result<Backend> {
    match choice {
        BackendChoice::File => Ok(Backend::File),
        BackendChoice::Auto => Ok(support
            .pick(preferred)
            .map(Backend::Native)
            .unwrap_or(Backend::File)),
        BackendChoice::Native => support.pick(preferred).map(Backend::Native).ok_or_else(|| {
            SemaphoreError::Unsupported("the native semaphore backend".to_string())
        }),
    }
}

/// Hands out guards for named cross-process locks.
pub struct SemaphoreFactory {
    config: Config,
    backend: Backend,
    lock_io: Arc<dyn LockIo>,
    process_finder: Arc<dyn ProcessFinder>,
    log: Arc<dyn Log>,
}

impl SemaphoreFactory {
    /// Factory over the real filesystem and process table.
    pub fn new(config: Config, log: Arc<dyn Log>) -> Result<Self> {
        let lock_io: Arc<dyn LockIo> = Arc::new(FileLockIo::new(
            config.lock_directory(),
            Arc::new(PhysicalFileSystem),
            log.clone(),
        ));
        let process_finder: Arc<dyn ProcessFinder> =
            Arc::new(SystemProcessFinder::new(config.host_process_names.clone()));

        Self::with_components(config, lock_io, process_finder, log)
    }

    pub fn with_components(
        config: Config,
        lock_io: Arc<dyn LockIo>,
        process_finder: Arc<dyn ProcessFinder>,
        log: Arc<dyn Log>,
    ) -> Result<Self> {
        config.validate()?;
        let backend = select_backend(
            config.backend,
            config.native_primitive,
            NativeSupport::current(),
        )?;
        log.verbose(&format!("Using {} backend for locks", backend));

        Ok(Self {
            config,
            backend,
            lock_io,
            process_finder,
            log,
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lock_io(&self) -> &Arc<dyn LockIo> {
        &self.lock_io
    }

    /// Lock-file engine for `name`, configured from this factory.
    pub fn file_semaphore(&self, name: &str) -> Result<LockFileSemaphore> {
        Ok(LockFileSemaphore::new(
            name,
            self.config.lock_timeout_for(name),
            self.lock_io.clone(),
            self.process_finder.clone(),
            self.log.clone(),
        )?
        .with_poll_interval(self.config.poll_interval()))
    }

    /// Block until `name` is held by the calling thread.
    ///
    /// `wait_message` is logged once if the lock is not obtained within the
    /// initial wait.
    pub fn acquire(&self, name: &str, wait_message: &str) -> Result<SemaphoreGuard> {
        let initial_wait = self.config.initial_wait();

        let guard = match self.backend {
            Backend::File => {
                let semaphore = self.file_semaphore(name)?;
                if !semaphore.wait_with_timeout(initial_wait) {
                    self.log.info(wait_message);
                    semaphore.wait_indefinitely();
                }
                SemaphoreGuard::file(semaphore, self.log.clone())
            }
            Backend::Native(primitive) => {
                let mut semaphore = self.open_native(name, primitive)?;
                let mut outcome = semaphore.wait(Some(initial_wait))?;
                if outcome == WaitOutcome::TimedOut {
                    self.log.info(wait_message);
                    outcome = semaphore.wait(None)?;
                }
                self.native_guard(semaphore, outcome)?
            }
        };

        self.log.verbose(&format!("Acquired lock '{}'", name));
        Ok(guard)
    }

    /// [`acquire`](Self::acquire) bounded by `max_wait`; `None` if the lock
    /// stayed busy.
    ///
    /// `wait_message` is logged once if the initial wait passes and part of
    /// `max_wait` is left.
    pub fn acquire_within(
        &self,
        name: &str,
        wait_message: &str,
        max_wait: Duration,
    ) -> Result<Option<SemaphoreGuard>> {
        let started = Instant::now();
        let initial_wait = self.config.initial_wait().min(max_wait);

        let guard = match self.backend {
            Backend::File => {
                let semaphore = self.file_semaphore(name)?;
                let mut acquired = semaphore.wait_with_timeout(initial_wait);
                if !acquired {
                    let remaining = max_wait.saturating_sub(started.elapsed());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    self.log.info(wait_message);
                    acquired = semaphore.wait_with_timeout(remaining);
                }
                if !acquired {
                    return Ok(None);
                }
                SemaphoreGuard::file(semaphore, self.log.clone())
            }
            Backend::Native(primitive) => {
                let mut semaphore = self.open_native(name, primitive)?;
                let mut outcome = semaphore.wait(Some(initial_wait))?;
                if outcome == WaitOutcome::TimedOut {
                    let remaining = max_wait.saturating_sub(started.elapsed());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    self.log.info(wait_message);
                    outcome = semaphore.wait(Some(remaining))?;
                }
                if outcome == WaitOutcome::TimedOut {
                    return Ok(None);
                }
                self.native_guard(semaphore, outcome)?
            }
        };

        self.log.verbose(&format!("Acquired lock '{}'", name));
        Ok(Some(guard))
    }

    /// Wait at most `max_wait` for `name`; `None` if it stayed busy.
    pub fn try_acquire_for(&self, name: &str, max_wait: Duration) -> Result<Option<SemaphoreGuard>> {
        match self.backend {
            Backend::File => {
                let semaphore = self.file_semaphore(name)?;
                if semaphore.wait_with_timeout(max_wait) {
                    Ok(Some(SemaphoreGuard::file(semaphore, self.log.clone())))
                } else {
                    Ok(None)
                }
            }
            Backend::Native(primitive) => {
                let mut semaphore = self.open_native(name, primitive)?;
                match semaphore.wait(Some(max_wait))? {
                    WaitOutcome::TimedOut => Ok(None),
                    outcome => self.native_guard(semaphore, outcome).map(Some),
                }
            }
        }
    }

    fn open_native(&self, name: &str, primitive: NativePrimitive) -> Result<NativeSemaphore> {
        validate_lock_name(name)?;
        NativeSemaphore::open(name, primitive, self.log.as_ref())
    }

    fn native_guard(&self, semaphore: NativeSemaphore, outcome: WaitOutcome) -> Result<SemaphoreGuard> {
        match outcome {
            WaitOutcome::Acquired => {}
            WaitOutcome::Abandoned => self.log.warn(&format!(
                "Lock '{}' was abandoned by a process that exited without releasing it. Taking lock.",
                semaphore.name()
            )),
            WaitOutcome::TimedOut => {
                return Err(SemaphoreError::LockTimeout(format!(
                    "wait on '{}' ended without ownership",
                    semaphore.name()
                )));
            }
        }
        Ok(SemaphoreGuard::native(semaphore, self.log.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_choice_always_uses_lock_files() {
        for support in [NativeSupport::ALL, NativeSupport::NONE] {
            assert_eq!(
                select_backend(BackendChoice::File, NativePrimitive::Semaphore, support).unwrap(),
                Backend::File
            );
        }
    }

    #[test]
    fn auto_prefers_native_where_supported() {
        assert_eq!(
            select_backend(BackendChoice::Auto, NativePrimitive::Mutex, NativeSupport::ALL)
                .unwrap(),
            Backend::Native(NativePrimitive::Mutex)
        );
        assert_eq!(
            select_backend(BackendChoice::Auto, NativePrimitive::Mutex, NativeSupport::NONE)
                .unwrap(),
            Backend::File
        );
    }

    #[test]
    fn native_choice_fails_without_support() {
        let err = select_backend(
            BackendChoice::Native,
            NativePrimitive::Semaphore,
            NativeSupport::NONE,
        )
        .unwrap_err();
        assert!(matches!(err, SemaphoreError::Unsupported(_)));
    }

    #[test]
    fn native_choice_uses_requested_primitive() {
        assert_eq!(
            select_backend(
                BackendChoice::Native,
                NativePrimitive::Semaphore,
                NativeSupport::ALL
            )
            .unwrap(),
            Backend::Native(NativePrimitive::Semaphore)
        );
    }

    #[test]
    fn backend_display() {
        assert_eq!(Backend::File.to_string(), "lock file");
        assert_eq!(
            Backend::Native(NativePrimitive::Semaphore).to_string(),
            "native semaphore"
        );
    }
}
