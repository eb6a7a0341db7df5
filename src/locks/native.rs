//! OS named synchronization objects.
//!
//! A Windows named mutex is owned by a thread. If the holder dies, the next
//! waiter gets it with `WAIT_ABANDONED`, which is reported as
//! [`WaitOutcome::Abandoned`]. A named semaphore has no owner. A holder that
//! dies without releasing leaves the count at zero for as long as any other
//! process keeps the object open, so only the mutex recovers from a crash.
//!
//! POSIX named semaphores behave like the Windows semaphore and also outlive
//! every handle, so no native primitive is offered outside Windows and the
//! factory falls back to lock files.

use super::retry;
use crate::config::NativePrimitive;
use crate::error::{Result, SemaphoreError};
use crate::log::Log;
use std::time::Duration;

/// Prefix that makes a named object visible across sessions.
pub const GLOBAL_NAMESPACE_PREFIX: &str = "Global\\";

/// Kernel object name for a lock name.
pub fn native_name(name: &str) -> String {
    format!("{}{}", GLOBAL_NAMESPACE_PREFIX, name)
}

/// Native primitives available on the running platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeSupport {
    pub semaphore: bool,
    pub mutex: bool,
}

impl NativeSupport {
    pub const NONE: NativeSupport = NativeSupport {
        semaphore: false,
        mutex: false,
    };

    pub const ALL: NativeSupport = NativeSupport {
        semaphore: true,
        mutex: true,
    };

    pub fn current() -> Self {
        if cfg!(windows) {
            Self::ALL
        } else {
            Self::NONE
        }
    }

    pub fn supports(&self, primitive: NativePrimitive) -> bool {
        match primitive {
            NativePrimitive::Semaphore => self.semaphore,
            NativePrimitive::Mutex => self.mutex,
        }
    }

    /// The preferred primitive, or the other one if only that is available.
    pub fn pick(&self, preferred: NativePrimitive) -> Option<NativePrimitive> {
        let fallback = match preferred {
            NativePrimitive::Semaphore => NativePrimitive::Mutex,
            NativePrimitive::Mutex => NativePrimitive::Semaphore,
        };
        [preferred, fallback]
            .into_iter()
            .find(|primitive| self.supports(*primitive))
    }
}

/// Result of waiting on a native primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Acquired,
    /// A mutex whose previous owner exited without releasing it. Ownership
    /// has passed to the caller.
    Abandoned,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_acquired(&self) -> bool {
        !matches!(self, WaitOutcome::TimedOut)
    }
}

/// Open handle to a named semaphore or mutex.
pub struct NativeSemaphore {
    name: String,
    primitive: NativePrimitive,
    handle: sys::Handle,
    held: bool,
}

impl NativeSemaphore {
    /// Create or open the named primitive for `name`.
    ///
    /// Creation is retried with backoff; the last OS error is reported as
    /// `SemaphoreError::Native` once the attempts run out.
    pub fn open(name: &str, primitive: NativePrimitive, log: &dyn Log) -> Result<Self> {
        if !NativeSupport::current().supports(primitive) {
            return Err(SemaphoreError::Unsupported(format!(
                "native {:?} primitive",
                primitive
            )));
        }

        let object_name = native_name(name);
        let handle = retry::with_retry(
            || sys::create(&object_name, primitive),
            |attempt, e| {
                log.verbose(&format!(
                    "Creating native lock '{}' failed (attempt {}): {}",
                    object_name, attempt, e
                ))
            },
        )
        .map_err(|e| {
            SemaphoreError::Native(format!(
                "failed to create '{}' after {} attempts: {}",
                object_name,
                retry::MAX_ATTEMPTS,
                e
            ))
        })?;

        Ok(Self {
            name: name.to_string(),
            primitive,
            handle,
            held: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primitive(&self) -> NativePrimitive {
        self.primitive
    }

    /// Wait for ownership; `None` waits forever.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let outcome = sys::wait(&self.handle, timeout).map_err(|e| {
            SemaphoreError::Native(format!("failed to wait on '{}': {}", self.name, e))
        })?;
        if outcome.is_acquired() {
            self.held = true;
        }
        Ok(outcome)
    }

    /// Give up ownership and close the handle.
    pub fn release(mut self) -> Result<()> {
        self.release_held()
    }

    fn release_held(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        sys::release(&self.handle, self.primitive).map_err(|e| {
            SemaphoreError::Native(format!("failed to release '{}': {}", self.name, e))
        })
    }
}

impl Drop for NativeSemaphore {
    fn drop(&mut self) {
        let _ = self.release_held();
    }
}

impl std::fmt::Debug for NativeSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeSemaphore")
            .field("name", &self.name)
            .field("primitive", &self.primitive)
            .field("held", &self.held)
            .finish()
    }
}

#[cfg(windows)]
mod sys {
    use super::WaitOutcome;
    use crate::config::NativePrimitive;
    use std::ffi::c_void;
    use std::io;
    use std::time::Duration;
    use windows_sys::Win32::Foundation::{
        CloseHandle, HANDLE, WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT,
    };
    use windows_sys::Win32::Security::{
        InitializeSecurityDescriptor, SECURITY_ATTRIBUTES, SECURITY_DESCRIPTOR,
        SetSecurityDescriptorDacl,
    };
    use windows_sys::Win32::System::SystemServices::SECURITY_DESCRIPTOR_REVISION;
    use windows_sys::Win32::System::Threading::{
        CreateMutexW, CreateSemaphoreW, INFINITE, ReleaseMutex, ReleaseSemaphore,
        WaitForSingleObject,
    };

    pub struct Handle(HANDLE);

    impl Drop for Handle {
        fn drop(&mut self) {
            // SAFETY: the handle came from a successful Create call and is
            // closed exactly once.
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    fn wide(value: &str) -> Vec<u16> {
        value.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Create or open the object with a NULL DACL so every local user can
    /// open it.
    pub fn create(name: &str, primitive: NativePrimitive) -> io::Result<Handle> {
        let name = wide(name);

        // SAFETY: the descriptor and attributes outlive the Create call, and
        // the name is NUL terminated.
        unsafe {
            let mut descriptor: SECURITY_DESCRIPTOR = std::mem::zeroed();
            let descriptor_ptr = &mut descriptor as *mut SECURITY_DESCRIPTOR as *mut c_void;
            if InitializeSecurityDescriptor(descriptor_ptr, SECURITY_DESCRIPTOR_REVISION) == 0 {
                return Err(io::Error::last_os_error());
            }
            if SetSecurityDescriptorDacl(descriptor_ptr, 1, std::ptr::null(), 0) == 0 {
                return Err(io::Error::last_os_error());
            }

            let attributes = SECURITY_ATTRIBUTES {
                nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
                lpSecurityDescriptor: descriptor_ptr,
                bInheritHandle: 0,
            };

            let handle = match primitive {
                NativePrimitive::Semaphore => {
                    CreateSemaphoreW(&attributes, 1, 1, name.as_ptr())
                }
                NativePrimitive::Mutex => CreateMutexW(&attributes, 0, name.as_ptr()),
            };

            if handle.is_null() {
                Err(io::Error::last_os_error())
            } else {
                Ok(Handle(handle))
            }
        }
    }

    pub fn wait(handle: &Handle, timeout: Option<Duration>) -> io::Result<WaitOutcome> {
        let millis = match timeout {
            None => INFINITE,
            Some(timeout) => timeout.as_millis().min(u128::from(INFINITE - 1)) as u32,
        };

        // SAFETY: the handle is open for the lifetime of `handle`.
        let result = unsafe { WaitForSingleObject(handle.0, millis) };
        match result {
            WAIT_OBJECT_0 => Ok(WaitOutcome::Acquired),
            WAIT_ABANDONED => Ok(WaitOutcome::Abandoned),
            WAIT_TIMEOUT => Ok(WaitOutcome::TimedOut),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn release(handle: &Handle, primitive: NativePrimitive) -> io::Result<()> {
        // SAFETY: the handle is open and owned by the calling thread.
        let released = unsafe {
            match primitive {
                NativePrimitive::Semaphore => {
                    ReleaseSemaphore(handle.0, 1, std::ptr::null_mut())
                }
                NativePrimitive::Mutex => ReleaseMutex(handle.0),
            }
        };

        if released == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

#[cfg(not(windows))]
mod sys {
    use super::WaitOutcome;
    use crate::config::NativePrimitive;
    use std::io;
    use std::time::Duration;

    pub struct Handle;

    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            "named native primitives are not available on this platform",
        )
    }

    pub fn create(_name: &str, _primitive: NativePrimitive) -> io::Result<Handle> {
        Err(unsupported())
    }

    pub fn wait(_handle: &Handle, _timeout: Option<Duration>) -> io::Result<WaitOutcome> {
        Err(unsupported())
    }

    pub fn release(_handle: &Handle, _primitive: NativePrimitive) -> io::Result<()> {
        Err(unsupported())
    }
}
