//! Logging capability for the semaphore subsystem.
//!
//! Engines and the factory never log through a global; they receive an
//! `Arc<dyn Log>` at construction. The binary wires in [`TracingLog`], tests
//! use [`InMemoryLog`] to assert on emitted messages.

use std::sync::{Arc, Mutex};

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Verbose,
    Info,
    Warn,
}

/// Sink for messages emitted while acquiring and releasing locks.
pub trait Log: Send + Sync {
    fn verbose(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Forwards to `tracing` under the `semlock` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl TracingLog {
    pub fn shared() -> Arc<dyn Log> {
        Arc::new(TracingLog)
    }
}

impl Log for TracingLog {
    fn verbose(&self, message: &str) {
        tracing::debug!(target: "semlock", "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "semlock", "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "semlock", "{}", message);
    }
}

/// A single recorded log message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: Level,
    pub message: String,
}

/// Records messages in memory.
#[derive(Debug, Default)]
pub struct InMemoryLog {
    messages: Mutex<Vec<LogMessage>>,
}

impl InMemoryLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything logged so far.
    pub fn messages(&self) -> Vec<LogMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Whether a message with this level and exact text was logged.
    pub fn contains(&self, level: Level, message: &str) -> bool {
        self.messages()
            .iter()
            .any(|m| m.level == level && m.message == message)
    }

    /// Messages logged at the given level.
    pub fn at_level(&self, level: Level) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|m| m.level == level)
            .map(|m| m.message)
            .collect()
    }

    fn push(&self, level: Level, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(LogMessage {
                level,
                message: message.to_string(),
            });
    }
}

impl Log for InMemoryLog {
    fn verbose(&self, message: &str) {
        self.push(Level::Verbose, message);
    }

    fn info(&self, message: &str) {
        self.push(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(Level::Warn, message);
    }
}
