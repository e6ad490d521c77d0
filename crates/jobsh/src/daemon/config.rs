//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::jobs::process::DEFAULT_MAX_OUTPUT_BYTES;
use crate::logging_impl::LogConfig;
use crate::registry::RetentionPolicy;

/// Settings for one daemon instance.
///
/// Built once at startup and shared with every component through
/// [`DaemonContext`](super::DaemonContext).
///
/// # Example
///
/// ```rust
/// use jobsh::daemon::DaemonConfig;
/// use std::time::Duration;
///
/// let config = DaemonConfig::default()
///     .state_dir("/tmp/jobsh-state")
///     .tick_interval(Duration::from_millis(500));
/// assert!(config.jobs_path().ends_with("jobs.json"));
/// ```
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,

    /// Directory holding `jobs.json`, `registry.json` and `daemon.pid`
    pub state_dir: PathBuf,

    /// How often the scheduler checks for due jobs (default: 1s)
    pub tick_interval: Duration,

    /// Time between SIGTERM and SIGKILL when stopping a job (default: 5s)
    pub stop_grace: Duration,

    /// Output kept per stream of each execution (default: 1MB)
    pub max_output_bytes: usize,

    /// How long a client waits for a response (default: 30s)
    pub request_timeout: Duration,

    /// Shell that runs job commands with `-c` (default: /bin/sh)
    pub shell: PathBuf,

    pub retention: RetentionPolicy,

    /// Redaction applied to logged job commands
    pub log: LogConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            state_dir: default_state_dir(),
            tick_interval: Duration::from_secs(1),
            stop_grace: Duration::from_secs(5),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            request_timeout: Duration::from_secs(30),
            shell: PathBuf::from("/bin/sh"),
            retention: RetentionPolicy::default(),
            log: LogConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep all state and the socket under `dir`. Used by tests.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::default()
            .state_dir(dir)
            .socket_path(dir.join("daemon.sock"))
    }

    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.state_dir.join("jobs.json")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("registry.json")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir.join("daemon.pid")
    }
}

/// `$XDG_RUNTIME_DIR/jobsh/daemon.sock`, else `/tmp/jobsh-<uid>/daemon.sock`.
pub fn default_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR").filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir).join("jobsh").join("daemon.sock"),
        None => {
            let uid = nix::unistd::getuid();
            PathBuf::from(format!("/tmp/jobsh-{}", uid)).join("daemon.sock")
        }
    }
}

/// `$XDG_STATE_HOME/jobsh`, else `~/.local/state/jobsh`.
pub fn default_state_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(dir).join("jobsh");
    }
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    home.join(".local").join("state").join("jobsh")
}
