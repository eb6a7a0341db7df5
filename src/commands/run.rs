//! Implementation of the `semlock run` command.

use crate::cli::RunArgs;
use crate::error::{Result, SemaphoreError};
use crate::exit_codes;
use crate::locks::SemaphoreFactory;
use std::process::Command;
use std::time::Duration;

/// Execute the `semlock run` command.
///
/// Acquires the lock, runs the program to completion and releases the lock.
/// With `--timeout`, gives up with `LockTimeout` if the lock stays busy.
pub fn cmd_run(factory: &SemaphoreFactory, args: RunArgs) -> Result<i32> {
    let wait_message = args.wait_message();

    let guard = match args.timeout {
        None => factory.acquire(&args.name, &wait_message)?,
        Some(secs) => factory
            .acquire_within(&args.name, &wait_message, Duration::from_secs(secs))?
            .ok_or_else(|| {
                SemaphoreError::LockTimeout(format!(
                    "lock '{}' is still held after {}s",
                    args.name, secs
                ))
            })?,
    };

    let status = run_program(&args.program);
    guard.release()?;
    let status = status?;

    Ok(status.code().unwrap_or(exit_codes::USER_ERROR))
}

fn run_program(program: &[String]) -> Result<std::process::ExitStatus> {
    let (executable, arguments) = program
        .split_first()
        .ok_or_else(|| SemaphoreError::Command("no program given".to_string()))?;

    Command::new(executable)
        .args(arguments)
        .status()
        .map_err(|e| SemaphoreError::Command(format!("'{}': {}", executable, e)))
}
