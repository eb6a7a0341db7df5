//! Process liveness checks for recorded lock owners.
//!
//! A recorded pid is only trusted together with its process name, since pids
//! are recycled. When the live process table cannot be consulted the owner is
//! assumed to be running: a false "alive" costs a wait until the lock times
//! out, a false "dead" steals a lock that is in use.

#[cfg(any(target_os = "linux", windows))]
use std::path::Path;

/// Loaded-module suffixes checked when a runtime host is running the
/// application under its own image name.
const HOSTED_MODULE_SUFFIXES: [&str; 2] = [".exe", ".dll"];

/// Linux truncates `/proc/<pid>/comm` to this many bytes.
const COMM_MAX_LEN: usize = 15;

/// Answers whether a recorded owner process is still alive.
pub trait ProcessFinder: Send + Sync {
    fn is_running(&self, pid: u32, process_name: &str) -> bool;
}

/// A live process as seen in the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveProcess {
    pub name: String,
    /// Only the kernel's short command name was readable, not the image
    /// path. Another user's process on Linux reads this way.
    pub short_name_only: bool,
}

impl LiveProcess {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short_name_only: false,
        }
    }
}

/// Result of looking a pid up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessLookup {
    /// No such process (or it has exited and is awaiting reaping).
    Missing,
    Found(LiveProcess),
    /// The process table can't be queried for this pid.
    Unverifiable,
}

/// Source of process information.
pub trait ProcessTable: Send + Sync {
    fn lookup(&self, pid: u32) -> ProcessLookup;

    /// File names of the modules mapped into the process.
    fn modules(&self, pid: u32) -> Vec<String>;
}

/// How a name mismatch between the record and the live process is judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatching {
    /// A mismatch means the pid was recycled.
    Exact,
    /// A mismatch is forgiven when the live process is one of these runtime
    /// hosts and has the recorded application loaded as a module.
    HostAware { hosts: Vec<String> },
}

impl NameMatching {
    /// `Exact` on Windows, `HostAware` elsewhere.
    pub fn for_platform(hosts: Vec<String>) -> Self {
        if cfg!(windows) {
            NameMatching::Exact
        } else {
            NameMatching::HostAware { hosts }
        }
    }
}

/// Liveness oracle over a [`ProcessTable`].
pub struct SystemProcessFinder<T = OsProcessTable> {
    table: T,
    matching: NameMatching,
}

impl SystemProcessFinder<OsProcessTable> {
    pub fn new(host_process_names: Vec<String>) -> Self {
        Self::with_table(OsProcessTable, NameMatching::for_platform(host_process_names))
    }
}

impl<T: ProcessTable> SystemProcessFinder<T> {
    pub fn with_table(table: T, matching: NameMatching) -> Self {
        Self { table, matching }
    }

    fn hosts_module(&self, pid: u32, process_name: &str) -> bool {
        let candidates: Vec<String> = HOSTED_MODULE_SUFFIXES
            .iter()
            .map(|suffix| format!("{}{}", process_name, suffix))
            .collect();

        self.table.modules(pid).iter().any(|module| {
            candidates
                .iter()
                .any(|candidate| module.eq_ignore_ascii_case(candidate))
        })
    }
}

impl<T: ProcessTable> ProcessFinder for SystemProcessFinder<T> {
    fn is_running(&self, pid: u32, process_name: &str) -> bool {
        let live = match self.table.lookup(pid) {
            ProcessLookup::Missing => return false,
            ProcessLookup::Unverifiable => return true,
            ProcessLookup::Found(live) => live,
        };

        if names_match(&live.name, process_name) {
            return true;
        }

        let hosted = match &self.matching {
            NameMatching::Exact => false,
            NameMatching::HostAware { hosts } => {
                hosts.iter().any(|host| names_match(&live.name, host))
                    && self.hosts_module(pid, process_name)
            }
        };

        // A short name keeps the extension and drops the tail of long names,
        // so a mismatch against it does not prove the pid was recycled.
        hosted || live.short_name_only
    }
}

/// Compare a live process name with a recorded one, allowing for `comm`
/// truncation.
pub fn names_match(live: &str, recorded: &str) -> bool {
    if live == recorded {
        return true;
    }
    live.len() == COMM_MAX_LEN && recorded.len() > COMM_MAX_LEN && recorded.starts_with(live)
}

#[cfg(any(target_os = "linux", windows))]
fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
}

/// The host operating system's process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessTable;

#[cfg(target_os = "linux")]
impl ProcessTable for OsProcessTable {
    fn lookup(&self, pid: u32) -> ProcessLookup {
        let proc_root = Path::new("/proc");
        if !proc_root.join("self").exists() {
            return ProcessLookup::Unverifiable;
        }

        let dir = proc_root.join(pid.to_string());
        let stat = match std::fs::read_to_string(dir.join("stat")) {
            Ok(stat) => stat,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ProcessLookup::Missing,
            Err(_) => return ProcessLookup::Unverifiable,
        };

        // The state field follows the parenthesised command name.
        let state = stat
            .rfind(')')
            .and_then(|end| stat[end + 1..].split_whitespace().next());
        if matches!(state, Some("Z") | Some("X")) {
            return ProcessLookup::Missing;
        }

        // A replaced binary reads back as "<path> (deleted)".
        let image_name = std::fs::read_link(dir.join("exe")).ok().and_then(|exe| {
            let exe = exe.to_string_lossy();
            file_stem(Path::new(exe.trim_end_matches(" (deleted)")))
        });
        if let Some(name) = image_name {
            return ProcessLookup::Found(LiveProcess::named(name));
        }

        match std::fs::read_to_string(dir.join("comm")) {
            Ok(comm) => ProcessLookup::Found(LiveProcess {
                name: comm.trim_end().to_string(),
                short_name_only: true,
            }),
            Err(_) => ProcessLookup::Unverifiable,
        }
    }

    fn modules(&self, pid: u32) -> Vec<String> {
        let Ok(maps) = std::fs::read_to_string(format!("/proc/{}/maps", pid)) else {
            return Vec::new();
        };

        let mut modules: Vec<String> = maps
            .lines()
            .filter_map(|line| line.split_whitespace().nth(5))
            .filter(|path| path.starts_with('/'))
            .filter_map(|path| {
                Path::new(path)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .collect();
        modules.sort();
        modules.dedup();
        modules
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
impl ProcessTable for OsProcessTable {
    fn lookup(&self, pid: u32) -> ProcessLookup {
        let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
            return ProcessLookup::Missing;
        };
        if raw_pid <= 0 {
            return ProcessLookup::Missing;
        }

        // SAFETY: signal 0 performs the permission and existence checks only.
        let result = unsafe { libc::kill(raw_pid, 0) };
        if result == 0 {
            return ProcessLookup::Unverifiable;
        }

        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => ProcessLookup::Missing,
            _ => ProcessLookup::Unverifiable,
        }
    }

    fn modules(&self, _pid: u32) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(windows)]
impl ProcessTable for OsProcessTable {
    fn lookup(&self, pid: u32) -> ProcessLookup {
        use windows_sys::Win32::Foundation::{
            CloseHandle, ERROR_ACCESS_DENIED, GetLastError, STILL_ACTIVE,
        };
        use windows_sys::Win32::System::Threading::{
            GetExitCodeProcess, OpenProcess, PROCESS_NAME_WIN32,
            PROCESS_QUERY_LIMITED_INFORMATION, QueryFullProcessImageNameW,
        };

        // SAFETY: the handle is checked before use and closed on every path.
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return if GetLastError() == ERROR_ACCESS_DENIED {
                    ProcessLookup::Unverifiable
                } else {
                    ProcessLookup::Missing
                };
            }

            let mut exit_code = 0u32;
            let alive = GetExitCodeProcess(handle, &mut exit_code) != 0
                && exit_code == STILL_ACTIVE as u32;

            let mut buffer = [0u16; 1024];
            let mut size = buffer.len() as u32;
            let named = QueryFullProcessImageNameW(
                handle,
                PROCESS_NAME_WIN32,
                buffer.as_mut_ptr(),
                &mut size,
            ) != 0;
            CloseHandle(handle);

            if !alive {
                return ProcessLookup::Missing;
            }
            if !named {
                return ProcessLookup::Unverifiable;
            }

            let image = String::from_utf16_lossy(&buffer[..size as usize]);
            match file_stem(Path::new(&image)) {
                Some(name) => ProcessLookup::Found(LiveProcess::named(name)),
                None => ProcessLookup::Unverifiable,
            }
        }
    }

    fn modules(&self, _pid: u32) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(not(any(unix, windows)))]
impl ProcessTable for OsProcessTable {
    fn lookup(&self, _pid: u32) -> ProcessLookup {
        ProcessLookup::Unverifiable
    }

    fn modules(&self, _pid: u32) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeTable {
        processes: HashMap<u32, ProcessLookup>,
        modules: HashMap<u32, Vec<String>>,
    }

    impl FakeTable {
        fn with(mut self, pid: u32, name: &str) -> Self {
            self.processes
                .insert(pid, ProcessLookup::Found(LiveProcess::named(name)));
            self
        }

        fn with_short_name(mut self, pid: u32, comm: &str) -> Self {
            self.processes.insert(
                pid,
                ProcessLookup::Found(LiveProcess {
                    name: comm.to_string(),
                    short_name_only: true,
                }),
            );
            self
        }

        fn with_modules(mut self, pid: u32, modules: &[&str]) -> Self {
            self.modules
                .insert(pid, modules.iter().map(|m| m.to_string()).collect());
            self
        }

        fn unverifiable(mut self, pid: u32) -> Self {
            self.processes.insert(pid, ProcessLookup::Unverifiable);
            self
        }
    }

    impl ProcessTable for FakeTable {
        fn lookup(&self, pid: u32) -> ProcessLookup {
            self.processes
                .get(&pid)
                .cloned()
                .unwrap_or(ProcessLookup::Missing)
        }

        fn modules(&self, pid: u32) -> Vec<String> {
            self.modules.get(&pid).cloned().unwrap_or_default()
        }
    }

    fn host_aware() -> NameMatching {
        NameMatching::HostAware {
            hosts: vec!["mono".to_string(), "dotnet".to_string()],
        }
    }

    #[test]
    fn missing_pid_is_not_running() {
        let finder = SystemProcessFinder::with_table(FakeTable::default(), NameMatching::Exact);
        assert!(!finder.is_running(100, "calamari"));
    }

    #[test]
    fn matching_name_is_running() {
        let finder = SystemProcessFinder::with_table(
            FakeTable::default().with(100, "calamari"),
            NameMatching::Exact,
        );
        assert!(finder.is_running(100, "calamari"));
    }

    #[test]
    fn name_mismatch_is_authoritative_with_exact_matching() {
        let finder = SystemProcessFinder::with_table(
            FakeTable::default()
                .with(100, "mono")
                .with_modules(100, &["calamari.exe"]),
            NameMatching::Exact,
        );
        assert!(!finder.is_running(100, "calamari"));
    }

    #[test]
    fn recycled_pid_under_host_aware_matching_is_not_running() {
        let finder = SystemProcessFinder::with_table(
            FakeTable::default().with(100, "bash"),
            host_aware(),
        );
        assert!(!finder.is_running(100, "calamari"));
    }

    #[test]
    fn runtime_host_with_application_module_is_running() {
        let finder = SystemProcessFinder::with_table(
            FakeTable::default()
                .with(100, "mono")
                .with_modules(100, &["libc.so.6", "Calamari.exe"]),
            host_aware(),
        );
        assert!(finder.is_running(100, "Calamari"));
    }

    #[test]
    fn runtime_host_without_application_module_is_not_running() {
        let finder = SystemProcessFinder::with_table(
            FakeTable::default()
                .with(100, "dotnet")
                .with_modules(100, &["libc.so.6", "Other.dll"]),
            host_aware(),
        );
        assert!(!finder.is_running(100, "Calamari"));
    }

    #[test]
    fn module_of_non_host_process_is_ignored() {
        let finder = SystemProcessFinder::with_table(
            FakeTable::default()
                .with(100, "bash")
                .with_modules(100, &["Calamari.exe"]),
            host_aware(),
        );
        assert!(!finder.is_running(100, "Calamari"));
    }

    #[test]
    fn short_name_with_extension_is_running() {
        for matching in [NameMatching::Exact, host_aware()] {
            let finder = SystemProcessFinder::with_table(
                FakeTable::default().with_short_name(100, "deploy.v2"),
                matching,
            );
            assert!(finder.is_running(100, "deploy"));
        }
    }

    #[test]
    fn image_name_mismatch_is_still_authoritative() {
        let finder = SystemProcessFinder::with_table(
            FakeTable::default().with(100, "deploy.v2"),
            host_aware(),
        );
        assert!(!finder.is_running(100, "deploy"));
    }

    #[test]
    fn unverifiable_process_is_assumed_running() {
        let finder = SystemProcessFinder::with_table(
            FakeTable::default().unverifiable(100),
            NameMatching::Exact,
        );
        assert!(finder.is_running(100, "anything"));
    }

    #[test]
    fn names_match_allows_comm_truncation() {
        assert!(names_match("calamari", "calamari"));
        assert!(names_match("semlock-0123456", "semlock-0123456789abcdef"));
        assert!(!names_match("semlock-0123456", "other-0123456789abcdef"));
        assert!(!names_match("semlock", "semlock-extra"));
        assert!(!names_match("calamari", ""));
    }

    #[test]
    fn platform_matching() {
        let matching = NameMatching::for_platform(vec!["mono".to_string()]);
        if cfg!(windows) {
            assert_eq!(matching, NameMatching::Exact);
        } else {
            assert!(matches!(matching, NameMatching::HostAware { .. }));
        }
    }

    #[test]
    fn current_process_is_running() {
        let finder = SystemProcessFinder::new(vec!["dotnet".to_string()]);
        assert!(finder.is_running(
            std::process::id(),
            crate::locks::record::current_process_name()
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_process_is_found_in_proc() {
        match OsProcessTable.lookup(std::process::id()) {
            ProcessLookup::Found(live) => {
                assert!(!live.short_name_only);
                assert!(names_match(&live.name, crate::locks::record::current_process_name()));
            }
            other => panic!("expected Found, got {:?}", other),
        }
        assert!(!OsProcessTable.modules(std::process::id()).is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reaped_child_is_missing() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        assert_eq!(OsProcessTable.lookup(pid), ProcessLookup::Missing);
    }
}
