//! What reading a lock file can produce.

use super::record::LockRecord;
use chrono::{DateTime, Utc};
use std::fmt;

/// Result of inspecting a lock file.
///
/// I/O and parse failures are folded into variants here so the acquisition
/// decision is a plain match instead of error handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockReadOutcome {
    /// The record belongs to the calling process and thread.
    Owned(LockRecord),
    /// The record belongs to another process, or another thread of this one.
    HeldByOther(LockRecord),
    /// There is no lock file.
    Missing,
    /// The file exists but another process has it open exclusively.
    HeldExclusivelyElsewhere,
    /// The file exists but its content could not be parsed.
    Corrupt { created_at: DateTime<Utc> },
}

impl LockReadOutcome {
    /// The parsed record, if any.
    pub fn record(&self) -> Option<&LockRecord> {
        match self {
            LockReadOutcome::Owned(record) | LockReadOutcome::HeldByOther(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, LockReadOutcome::Owned(_))
    }
}

impl fmt::Display for LockReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockReadOutcome::Owned(record) => write!(
                f,
                "owned by this thread (process {}, thread {})",
                record.process_id, record.thread_id
            ),
            LockReadOutcome::HeldByOther(record) => write!(
                f,
                "held by process {} ({}), thread {}",
                record.process_id, record.process_name, record.thread_id
            ),
            LockReadOutcome::Missing => write!(f, "not locked"),
            LockReadOutcome::HeldExclusivelyElsewhere => {
                write!(f, "open exclusively by another process")
            }
            LockReadOutcome::Corrupt { created_at } => write!(
                f,
                "unreadable (file created {})",
                created_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        }
    }
}
