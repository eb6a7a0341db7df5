//! CLI argument parsing for semlock.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// semlock: cross-process named locks for deployment steps.
///
/// Locks are coordinated through `<name>.lck` files in a shared directory
/// (the system temp directory by default), or through native named
/// semaphores where the platform provides them.
#[derive(Parser, Debug)]
#[command(name = "semlock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a YAML config file.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for semlock.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a program while holding a lock.
    ///
    /// Blocks until the lock is acquired, runs the program, releases the
    /// lock and exits with the program's exit code.
    Run(RunArgs),

    /// Show the state of a lock file.
    ///
    /// Prints the owner, its age and liveness, and what an acquire attempt
    /// would do about it.
    Status(StatusArgs),

    /// List all lock files in the lock directory.
    List,

    /// Delete a lock file.
    ///
    /// Requires --force flag to prevent accidental clearing.
    Clear(ClearArgs),
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Lock name.
    pub name: String,

    /// Message logged if the lock is not acquired within the initial wait.
    #[arg(long, value_name = "MESSAGE")]
    pub wait_message: Option<String>,

    /// Give up after this many seconds instead of waiting indefinitely.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Program and arguments to run under the lock.
    #[arg(last = true, required = true, value_name = "PROGRAM")]
    pub program: Vec<String>,
}

impl RunArgs {
    pub fn wait_message(&self) -> String {
        self.wait_message
            .clone()
            .unwrap_or_else(|| format!("Waiting for lock '{}'...", self.name))
    }
}

/// Arguments for the `status` command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Lock name.
    pub name: String,
}

/// Arguments for the `clear` command.
#[derive(Parser, Debug)]
pub struct ClearArgs {
    /// Lock name.
    pub name: String,

    /// Force clearing the lock (required for safety).
    #[arg(long)]
    pub force: bool,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
