//! Single-instance guard: a pid file plus a probe of the control socket.

use std::io::Write;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::DaemonError;

/// Held for the life of a daemon. Dropping it removes the pid file and the
/// socket.
#[derive(Debug)]
pub struct InstanceLock {
    pid_path: PathBuf,
    socket_path: PathBuf,
    pid: u32,
}

impl InstanceLock {
    /// Claim the instance.
    ///
    /// Fails with [`DaemonError::AlreadyRunning`] when the socket answers or
    /// the pid file names a live process. Leftovers from a daemon that died
    /// are removed.
    pub async fn acquire(pid_path: &Path, socket_path: &Path) -> Result<Self, DaemonError> {
        let recorded = read_pid(pid_path);
        let answering = tokio::net::UnixStream::connect(socket_path).await.is_ok();
        let alive = recorded.is_some_and(process_alive);

        if answering || alive {
            return Err(DaemonError::AlreadyRunning {
                pid: recorded.unwrap_or(0),
            });
        }

        if socket_path.exists() {
            warn!(path = %socket_path.display(), "removing stale socket");
            std::fs::remove_file(socket_path)?;
        }
        if pid_path.exists() {
            warn!(path = %pid_path.display(), pid = recorded, "removing stale pid file");
            std::fs::remove_file(pid_path)?;
        }
        for dir in [pid_path.parent(), socket_path.parent()].into_iter().flatten() {
            std::fs::create_dir_all(dir)?;
        }

        let pid = std::process::id();
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(pid_path)
        {
            Ok(file) => file,
            // Lost a race with another daemon starting now
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(DaemonError::AlreadyRunning {
                    pid: read_pid(pid_path).unwrap_or(0),
                });
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", pid)?;
        debug!(pid, path = %pid_path.display(), "instance lock acquired");

        Ok(Self {
            pid_path: pid_path.to_path_buf(),
            socket_path: socket_path.to_path_buf(),
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Leave files alone if another instance has since taken over
        if read_pid(&self.pid_path) == Some(self.pid as i32) {
            let _ = std::fs::remove_file(&self.pid_path);
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: i32) -> bool {
    pid > 0 && kill(Pid::from_raw(pid), None).is_ok()
}
