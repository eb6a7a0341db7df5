use crate::fs::LockFileSystem;
use crate::locks::io::LockIo;
use crate::locks::outcome::LockReadOutcome;
use crate::locks::process::ProcessFinder;
use crate::locks::record::{LockRecord, to_ticks};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// In-memory [`LockFileSystem`] with scriptable failures.
#[derive(Default)]
pub(crate) struct FakeFileSystem {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    files: HashMap<PathBuf, Vec<u8>>,
    read_error: Option<io::ErrorKind>,
    transient_read_error: Option<(io::ErrorKind, usize)>,
    create_error: Option<io::ErrorKind>,
    delete_error: Option<io::ErrorKind>,
    creation_time: Option<DateTime<Utc>>,
    create_calls: usize,
    overwrite_calls: usize,
    delete_calls: usize,
}

impl FakeFileSystem {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn put(&self, path: &Path, content: &[u8]) {
        lock(&self.state)
            .files
            .insert(path.to_path_buf(), content.to_vec());
    }

    pub(crate) fn content(&self, path: &Path) -> Option<Vec<u8>> {
        lock(&self.state).files.get(path).cloned()
    }

    pub(crate) fn fail_reads_with(&self, kind: io::ErrorKind) {
        lock(&self.state).read_error = Some(kind);
    }

    /// Fail only the next `count` reads.
    pub(crate) fn fail_next_reads_with(&self, kind: io::ErrorKind, count: usize) {
        lock(&self.state).transient_read_error = Some((kind, count));
    }

    pub(crate) fn fail_creates_with(&self, kind: io::ErrorKind) {
        lock(&self.state).create_error = Some(kind);
    }

    pub(crate) fn fail_deletes_with(&self, kind: io::ErrorKind) {
        lock(&self.state).delete_error = Some(kind);
    }

    pub(crate) fn set_creation_time(&self, time: DateTime<Utc>) {
        lock(&self.state).creation_time = Some(time);
    }

    pub(crate) fn create_calls(&self) -> usize {
        lock(&self.state).create_calls
    }

    pub(crate) fn overwrite_calls(&self) -> usize {
        lock(&self.state).overwrite_calls
    }

    pub(crate) fn delete_calls(&self) -> usize {
        lock(&self.state).delete_calls
    }
}

impl LockFileSystem for FakeFileSystem {
    fn exists(&self, path: &Path) -> bool {
        lock(&self.state).files.contains_key(path)
    }

    fn read_exclusive(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut state = lock(&self.state);
        if let Some((kind, remaining)) = state.transient_read_error.as_mut()
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(io::Error::from(*kind));
        }
        if let Some(kind) = state.read_error {
            return Err(io::Error::from(kind));
        }
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn create_new(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.create_calls += 1;
        if let Some(kind) = state.create_error {
            return Err(io::Error::from(kind));
        }
        if state.files.contains_key(path) {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists));
        }
        state.files.insert(path.to_path_buf(), content.to_vec());
        Ok(())
    }

    fn overwrite(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.overwrite_calls += 1;
        state.files.insert(path.to_path_buf(), content.to_vec());
        Ok(())
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.delete_calls += 1;
        if let Some(kind) = state.delete_error {
            return Err(io::Error::from(kind));
        }
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn creation_time(&self, _path: &Path) -> io::Result<DateTime<Utc>> {
        Ok(lock(&self.state).creation_time.unwrap_or_else(Utc::now))
    }
}

/// [`LockIo`] that returns scripted read outcomes and write results.
pub(crate) struct ScriptedLockIo {
    outcome: Mutex<LockReadOutcome>,
    queued_reads: Mutex<VecDeque<LockReadOutcome>>,
    exists: AtomicBool,
    write_results: Mutex<VecDeque<bool>>,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl ScriptedLockIo {
    pub(crate) fn new(outcome: LockReadOutcome) -> Arc<Self> {
        let exists = !matches!(outcome, LockReadOutcome::Missing);
        Arc::new(Self {
            outcome: Mutex::new(outcome),
            queued_reads: Mutex::new(VecDeque::new()),
            exists: AtomicBool::new(exists),
            write_results: Mutex::new(VecDeque::new()),
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        })
    }

    /// Queue results for successive writes; writes past the queue succeed.
    pub(crate) fn with_write_results(self: Arc<Self>, results: &[bool]) -> Arc<Self> {
        lock(&self.write_results).extend(results.iter().copied());
        self
    }

    /// Queue outcomes for successive reads; reads past the queue return the
    /// fixed outcome.
    pub(crate) fn with_reads(self: Arc<Self>, outcomes: &[LockReadOutcome]) -> Arc<Self> {
        lock(&self.queued_reads).extend(outcomes.iter().cloned());
        self
    }

    pub(crate) fn set_outcome(&self, outcome: LockReadOutcome) {
        self.exists
            .store(!matches!(outcome, LockReadOutcome::Missing), Ordering::SeqCst);
        *lock(&self.outcome) = outcome;
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl LockIo for ScriptedLockIo {
    fn path_for(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("/scripted/{}.lck", name))
    }

    fn exists(&self, _path: &Path) -> bool {
        self.exists.load(Ordering::SeqCst)
    }

    fn read(&self, _path: &Path) -> LockReadOutcome {
        if let Some(outcome) = lock(&self.queued_reads).pop_front() {
            return outcome;
        }
        lock(&self.outcome).clone()
    }

    fn write(&self, _path: &Path, _record: &LockRecord) -> bool {
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.write_results).pop_front().unwrap_or(true)
    }

    fn delete(&self, _path: &Path) {
        self.deletes.fetch_add(1, Ordering::SeqCst);
    }
}

/// [`ProcessFinder`] with a fixed answer.
pub(crate) struct FakeProcessFinder {
    running: AtomicBool,
}

impl FakeProcessFinder {
    pub(crate) fn running() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(true),
        })
    }

    pub(crate) fn dead() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
        })
    }
}

impl ProcessFinder for FakeProcessFinder {
    fn is_running(&self, _pid: u32, _process_name: &str) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A record held by some other process, acquired `age` ago.
pub(crate) fn foreign_record(age: Duration) -> LockRecord {
    LockRecord {
        process_id: std::process::id().wrapping_add(1),
        process_name: "calamari".to_string(),
        thread_id: 1,
        timestamp: to_ticks(Utc::now() - age),
    }
}
