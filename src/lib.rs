//! semlock: cross-process named locks for processes on one machine.
//!
//! [`locks::SemaphoreFactory`] is the entry point: it picks a native named
//! primitive or the lock-file engine once, and hands out
//! [`locks::SemaphoreGuard`]s that release on drop.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exit_codes;
pub mod fs;
pub mod locks;
pub mod log;

#[cfg(test)]
mod test_support;
