//! RAII semaphore guard.

use super::file_semaphore::LockFileSemaphore;
use super::native::NativeSemaphore;
use crate::error::Result;
use crate::log::Log;
use std::marker::PhantomData;
use std::sync::Arc;

enum Held {
    File(LockFileSemaphore),
    Native(NativeSemaphore),
}

/// RAII guard for an acquired semaphore.
///
/// When dropped, the semaphore is released. If releasing fails during drop,
/// a warning is logged but no panic occurs. The guard is `!Send`: ownership
/// is tied to the acquiring thread (lock records carry its thread id, and
/// native mutexes are thread-affine).
pub struct SemaphoreGuard {
    name: String,

    /// `None` once released.
    held: Option<Held>,

    log: Arc<dyn Log>,
    _not_send: PhantomData<*const ()>,
}

impl SemaphoreGuard {
    pub(super) fn file(semaphore: LockFileSemaphore, log: Arc<dyn Log>) -> Self {
        Self::new(semaphore.name().to_string(), Held::File(semaphore), log)
    }

    pub(super) fn native(semaphore: NativeSemaphore, log: Arc<dyn Log>) -> Self {
        Self::new(semaphore.name().to_string(), Held::Native(semaphore), log)
    }

    fn new(name: String, held: Held, log: Arc<dyn Log>) -> Self {
        Self {
            name,
            held: Some(held),
            log,
            _not_send: PhantomData,
        }
    }

    /// Name of the held lock.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this guard is backed by a lock file.
    pub fn is_file_backed(&self) -> bool {
        matches!(self.held, Some(Held::File(_)))
    }

    /// Manually release the semaphore.
    ///
    /// This is useful when you want to release before the guard goes out of
    /// scope and handle errors explicitly.
    pub fn release(mut self) -> Result<()> {
        self.release_held()
    }

    fn release_held(&mut self) -> Result<()> {
        match self.held.take() {
            Some(Held::File(semaphore)) => {
                semaphore.release();
                Ok(())
            }
            Some(Held::Native(semaphore)) => semaphore.release(),
            None => Ok(()),
        }
    }
}

impl Drop for SemaphoreGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_held() {
            self.log.warn(&format!(
                "Failed to release lock '{}': {}",
                self.name, e
            ));
        }
    }
}

impl std::fmt::Debug for SemaphoreGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemaphoreGuard")
            .field("name", &self.name)
            .field("released", &self.held.is_none())
            .finish()
    }
}
