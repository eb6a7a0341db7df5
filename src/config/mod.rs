//! Configuration model for semlock.
//!
//! The config is an optional YAML file. Unknown fields are ignored for forward
//! compatibility and every field has a default, so an empty file (or no file
//! at all) yields the stock behaviour: auto-selected backend, lock files in the
//! system temp directory, and a two minute staleness timeout.


use crate::error::{Result, SemaphoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which semaphore backend the factory should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    /// Native primitive where the platform has one, lock files otherwise (default).
    #[default]
    Auto,
    /// Always use lock files.
    File,
    /// Always use the native primitive; fails where unsupported.
    Native,
}

/// Native primitive kind used when the native backend is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NativePrimitive {
    /// Named semaphore with a count of one (default).
    #[default]
    Semaphore,
    /// Named mutex; an abandoned mutex counts as acquired.
    Mutex,
}

/// Configuration for the semaphore subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Backend selection
    // =========================================================================
    /// Backend selection policy.
    #[serde(default)]
    pub backend: BackendChoice,

    /// Native primitive kind.
    #[serde(default)]
    pub native_primitive: NativePrimitive,

    // =========================================================================
    // Lock file settings
    // =========================================================================
    /// Directory holding `<name>.lck` files (default: system temp directory).
    /// Every cooperating process must agree on this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_directory: Option<PathBuf>,

    /// Seconds after which a lock held by a live process is forcibly reclaimed.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Per-lock-name overrides of `lock_timeout_secs`.
    #[serde(default)]
    pub lock_timeouts: BTreeMap<String, u64>,

    // =========================================================================
    // Waiting
    // =========================================================================
    /// Milliseconds to wait silently before logging the caller's wait message.
    #[serde(default = "default_initial_wait_ms")]
    pub initial_wait_ms: u64,

    /// Milliseconds between lock file polling attempts.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    // =========================================================================
    // Liveness
    // =========================================================================
    /// Process names of runtime hosts that run applications under a generic
    /// image name (checked through the loaded module list on POSIX).
    #[serde(default = "default_host_process_names")]
    pub host_process_names: Vec<String>,
}

fn default_lock_timeout_secs() -> u64 {
    120
}
fn default_initial_wait_ms() -> u64 {
    3000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_host_process_names() -> Vec<String> {
    vec!["dotnet".to_string(), "mono".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendChoice::default(),
            native_primitive: NativePrimitive::default(),
            lock_directory: None,
            lock_timeout_secs: default_lock_timeout_secs(),
            lock_timeouts: BTreeMap::new(),
            initial_wait_ms: default_initial_wait_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            host_process_names: default_host_process_names(),
        }
    }
}

impl Config {
    /// Load config from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            SemaphoreError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // serde_yaml rejects a completely empty document for a struct
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(yaml).map_err(|e| {
            SemaphoreError::Config(format!("failed to parse config YAML: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            SemaphoreError::Config(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values.
    ///
    /// - `lock_timeout_secs` and every `lock_timeouts` entry must be positive
    /// - `poll_interval_ms` must be positive
    /// - `host_process_names` entries must be non-empty
    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_secs == 0 {
            return Err(SemaphoreError::Config(
                "config validation failed: lock_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if let Some((name, _)) = self.lock_timeouts.iter().find(|(_, secs)| **secs == 0) {
            return Err(SemaphoreError::Config(format!(
                "config validation failed: lock_timeouts entry '{}' must be greater than 0",
                name
            )));
        }

        if self.poll_interval_ms == 0 {
            return Err(SemaphoreError::Config(
                "config validation failed: poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.host_process_names.iter().any(|n| n.trim().is_empty()) {
            return Err(SemaphoreError::Config(
                "config validation failed: host_process_names entries must be non-empty"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Staleness timeout for the named lock.
    pub fn lock_timeout_for(&self, name: &str) -> Duration {
        let secs = self
            .lock_timeouts
            .get(name)
            .copied()
            .unwrap_or(self.lock_timeout_secs);
        Duration::from_secs(secs)
    }

    /// Directory that holds lock files.
    pub fn lock_directory(&self) -> PathBuf {
        self.lock_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn initial_wait(&self) -> Duration {
        Duration::from_millis(self.initial_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
