//! Lock records and claimant identity.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// 100 ns ticks per second.
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks between 0001-01-01T00:00:00Z and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

static PROCESS_NAME: OnceLock<String> = OnceLock::new();

/// Process-local id of the calling thread.
///
/// Ids are handed out on first use and never reused within a process, so a
/// record left behind by a finished thread can't be mistaken for a live one.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// Image name of the current process (executable file stem).
pub fn current_process_name() -> &'static str {
    PROCESS_NAME.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "unknown".to_string())
    })
}

/// The (process id, process name, thread id) triple that identifies a claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockIdentity {
    pub process_id: u32,
    pub process_name: String,
    pub thread_id: u64,
}

impl LockIdentity {
    /// Identity of the calling thread.
    pub fn current() -> Self {
        Self {
            process_id: std::process::id(),
            process_name: current_process_name().to_string(),
            thread_id: current_thread_id(),
        }
    }
}

/// Lock record persisted in a `.lck` file.
///
/// Field names match the JSON written by existing deployments:
/// `{"ProcessId":100,"ProcessName":"calamari","ThreadId":1,"Timestamp":638...}`.
/// Equality only considers the identity triple; two records for the same
/// claimant are equal whatever their timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LockRecord {
    pub process_id: u32,
    pub process_name: String,
    pub thread_id: u64,

    /// Acquisition time in 100 ns ticks since 0001-01-01 UTC.
    pub timestamp: i64,
}

impl PartialEq for LockRecord {
    fn eq(&self, other: &Self) -> bool {
        self.process_id == other.process_id
            && self.process_name == other.process_name
            && self.thread_id == other.thread_id
    }
}

impl Eq for LockRecord {}

impl LockRecord {
    pub fn new(identity: LockIdentity, acquired_at: DateTime<Utc>) -> Self {
        Self {
            process_id: identity.process_id,
            process_name: identity.process_name,
            thread_id: identity.thread_id,
            timestamp: to_ticks(acquired_at),
        }
    }

    /// A record for the calling thread, stamped now.
    pub fn for_current_thread() -> Self {
        Self::new(LockIdentity::current(), Utc::now())
    }

    pub fn identity(&self) -> LockIdentity {
        LockIdentity {
            process_id: self.process_id,
            process_name: self.process_name.clone(),
            thread_id: self.thread_id,
        }
    }

    pub fn belongs_to_current_thread(&self) -> bool {
        self.identity() == LockIdentity::current()
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        from_ticks(self.timestamp)
    }

    /// Time since acquisition; negative when the writer's clock ran ahead.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.acquired_at())
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        let age = self.age();
        let seconds = age.num_seconds();
        let minutes = age.num_minutes();
        let hours = age.num_hours();

        if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds % 60)
        } else {
            format!("{}s", seconds)
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Convert a UTC time to 100 ns ticks since 0001-01-01.
pub fn to_ticks(time: DateTime<Utc>) -> i64 {
    let seconds = time.timestamp();
    let sub_ticks = i64::from(time.timestamp_subsec_nanos() / 100);
    UNIX_EPOCH_TICKS
        .saturating_add(seconds.saturating_mul(TICKS_PER_SECOND))
        .saturating_add(sub_ticks)
}

/// Convert ticks back to a UTC time, saturating at the representable range.
pub fn from_ticks(ticks: i64) -> DateTime<Utc> {
    let unix_ticks = ticks.saturating_sub(UNIX_EPOCH_TICKS);
    let seconds = unix_ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (unix_ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;

    DateTime::from_timestamp(seconds, nanos).unwrap_or(if unix_ticks < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}
