//! Implementation of the `semlock clear` command.

use crate::cli::ClearArgs;
use crate::error::{Result, SemaphoreError};
use crate::exit_codes;
use crate::locks::{LockAssessment, SemaphoreFactory};

/// Execute the `semlock clear` command.
///
/// Deletes the lock file regardless of its owner. Requires `--force`.
pub fn cmd_clear(factory: &SemaphoreFactory, args: ClearArgs) -> Result<i32> {
    if !args.force {
        return Err(SemaphoreError::UserError(format!(
            "refusing to clear lock without --force flag.\n\n\
             Clearing a lock lets another process in while the holder may still be working.\n\
             Only clear locks if you are certain the lock holder has crashed.\n\n\
             To clear the lock, run:\n  semlock clear {} --force",
            args.name
        )));
    }

    let semaphore = factory.file_semaphore(&args.name)?;
    let path = semaphore.lock_file_path();
    let lock_io = factory.lock_io();

    if !lock_io.exists(path) {
        println!("No lock file for '{}'.", args.name);
        return Ok(exit_codes::SUCCESS);
    }

    let outcome = lock_io.read(path);
    if let LockAssessment::Busy(record) = semaphore.assess(&outcome) {
        eprintln!(
            "Warning: process {} ({}) is still running and held this lock {} ago.",
            record.process_id,
            record.process_name,
            record.age_string()
        );
    }

    lock_io.delete(path);
    if lock_io.exists(path) {
        return Err(SemaphoreError::Io(format!(
            "failed to delete lock file '{}'",
            path.display()
        )));
    }

    println!("Cleared lock: {}", args.name);
    Ok(exit_codes::SUCCESS)
}
