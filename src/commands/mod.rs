//! Command implementations for semlock.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Every command returns the process exit code on success.

mod clear;
mod run;
mod status;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::error::Result;
use crate::locks::SemaphoreFactory;
use crate::log::TracingLog;

pub use clear::cmd_clear;
pub use run::cmd_run;
pub use status::{cmd_list, cmd_status};

/// Dispatch a command to its implementation.
///
/// Loads the config named by `--config` (defaults otherwise) and routes the
/// command to its handler.
pub fn dispatch(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref())?;
    let factory = SemaphoreFactory::new(config, TracingLog::shared())?;

    match cli.command {
        Command::Run(args) => cmd_run(&factory, args),
        Command::Status(args) => cmd_status(&factory, args),
        Command::List => cmd_list(&factory),
        Command::Clear(args) => cmd_clear(&factory, args),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}
