//! Exit code constants for the semlock CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config, invalid lock name)
//! - 4: Lock acquisition failure (bounded wait expired)
//! - 5: Native synchronization primitive failure

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, unreadable config, or an invalid lock name.
pub const USER_ERROR: i32 = 1;

/// Lock acquisition failure: the lock could not be obtained within the allowed wait.
pub const LOCK_FAILURE: i32 = 4;

/// The OS named semaphore/mutex could not be created, waited on, or released.
pub const NATIVE_FAILURE: i32 = 5;
