//! Error types for semlock.
//!
//! Contention, corrupt lock files and abandoned locks are not errors; they are
//! resolved inside the semaphore engine. Only conditions that leave the caller
//! without exclusivity surface here.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for semaphore operations.
#[derive(Error, Debug)]
pub enum SemaphoreError {
    /// The request is valid input but cannot be carried out as asked.
    #[error("{0}")]
    UserError(String),

    /// The lock name cannot be mapped to a lock file or native primitive.
    #[error("invalid lock name '{0}': {1}")]
    InvalidName(String, String),

    /// The requested backend is not available on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(String),

    /// The OS named primitive failed after retries.
    #[error("native semaphore failure: {0}")]
    Native(String),

    /// Configuration could not be read, parsed or validated.
    #[error("{0}")]
    Config(String),

    /// A lock could not be acquired within the allowed wait.
    #[error("Lock acquisition failed: {0}")]
    LockTimeout(String),

    /// A filesystem operation outside the lock protocol failed.
    #[error("{0}")]
    Io(String),

    /// The command run under the lock could not be started.
    #[error("failed to run command: {0}")]
    Command(String),
}

impl SemaphoreError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            SemaphoreError::UserError(_) => exit_codes::USER_ERROR,
            SemaphoreError::InvalidName(..) => exit_codes::USER_ERROR,
            SemaphoreError::Unsupported(_) => exit_codes::USER_ERROR,
            SemaphoreError::Native(_) => exit_codes::NATIVE_FAILURE,
            SemaphoreError::Config(_) => exit_codes::USER_ERROR,
            SemaphoreError::LockTimeout(_) => exit_codes::LOCK_FAILURE,
            SemaphoreError::Io(_) => exit_codes::USER_ERROR,
            SemaphoreError::Command(_) => exit_codes::USER_ERROR,
        }
    }
}

/// Result type alias for semaphore operations.
pub type Result<T> = std::result::Result<T, SemaphoreError>;
