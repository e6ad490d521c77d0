//! Job table for background execution
//!
//! Each `cmd &` runs on its own tokio task with a forked interpreter. All
//! external processes the job starts share one process group, recorded in a
//! [`ProcessGroup`] slot so `kill %N`, `fg` and `bg` can signal the whole job.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::interpreter::ExecResult;

/// How long `fg` keeps waiting after forwarding an interrupt.
const FOREGROUND_GRACE: std::time::Duration = std::time::Duration::from_secs(1);

/// Process group shared by the processes of one job.
#[derive(Debug, Clone, Default)]
pub struct ProcessGroup {
    inner: Arc<GroupInner>,
}

#[derive(Debug, Default)]
struct GroupInner {
    pgid: Mutex<Option<i32>>,
    claimed: Notify,
}

impl ProcessGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group id, once the job's first process has started.
    pub fn pgid(&self) -> Option<i32> {
        self.inner.pgid.lock().ok().and_then(|slot| *slot)
    }

    /// Record the leader pid. Later claims are ignored.
    pub fn claim(&self, pid: i32) {
        if let Ok(mut slot) = self.inner.pgid.lock()
            && slot.is_none()
        {
            *slot = Some(pid);
            self.inner.claimed.notify_one();
        }
    }

    /// Wait until a leader is recorded or `timeout` elapses.
    pub async fn wait_claimed(&self, timeout: std::time::Duration) -> Option<i32> {
        if let Some(pgid) = self.pgid() {
            return Some(pgid);
        }
        let _ = tokio::time::timeout(timeout, self.inner.claimed.notified()).await;
        self.pgid()
    }

    /// Send `signal` to every process in the group.
    pub fn signal(&self, signal: Signal) -> nix::Result<bool> {
        match self.pgid() {
            Some(pgid) => killpg(Pid::from_raw(pgid), signal).map(|_| true),
            None => Ok(false),
        }
    }
}

/// Job lifecycle as shown by `jobs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done(i32),
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Running => write!(f, "Running"),
            JobState::Stopped => write!(f, "Stopped"),
            JobState::Done(0) => write!(f, "Done"),
            JobState::Done(code) => write!(f, "Exit {}", code),
        }
    }
}

/// A background job
pub struct Job {
    /// Job ID (`%N`)
    pub id: usize,
    /// Command text as typed
    pub command: String,
    pub group: ProcessGroup,
    pub state: JobState,
    handle: Option<JoinHandle<ExecResult>>,
    result: Option<ExecResult>,
}

impl Job {
    /// Output of a finished job.
    pub fn result(&self) -> Option<&ExecResult> {
        self.result.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, JobState::Done(_))
            || self.handle.as_ref().is_some_and(|h| h.is_finished())
    }
}

/// Job table for tracking background jobs
#[derive(Default)]
pub struct JobTable {
    jobs: BTreeMap<usize, Job>,
    /// Last spawned job ID (for $!)
    last_job_id: Option<usize>,
    /// Job ID that `%-` refers to
    previous_job_id: Option<usize>,
}

impl JobTable {
    /// Create a new empty job table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a background job. Returns its ID.
    pub fn spawn(
        &mut self,
        command: impl Into<String>,
        group: ProcessGroup,
        handle: JoinHandle<ExecResult>,
    ) -> usize {
        let id = self.jobs.keys().next_back().map_or(1, |last| last + 1);
        self.jobs.insert(
            id,
            Job {
                id,
                command: command.into(),
                group,
                state: JobState::Running,
                handle: Some(handle),
                result: None,
            },
        );
        self.previous_job_id = self.last_job_id;
        self.last_job_id = Some(id);
        id
    }

    /// Get the last spawned job ID
    pub fn last_job_id(&self) -> Option<usize> {
        self.last_job_id
    }

    /// Process group id of the last background job (`$!`).
    pub fn last_pid(&self) -> Option<i32> {
        self.last_job_id
            .and_then(|id| self.jobs.get(&id))
            .and_then(|job| job.group.pgid())
    }

    pub fn get(&self, id: usize) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    /// Jobs in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Current job (`%+`): the most recently started one still in the table.
    pub fn current(&self) -> Option<usize> {
        self.jobs.keys().next_back().copied()
    }

    /// Marker shown by `jobs`: `+` current, `-` previous.
    pub fn marker(&self, id: usize) -> char {
        let current = self.current();
        if current == Some(id) {
            '+'
        } else if self
            .jobs
            .keys()
            .rev()
            .find(|k| Some(**k) != current)
            .copied()
            == Some(id)
        {
            '-'
        } else {
            ' '
        }
    }

    /// Resolve a job spec: `%N`, `%%`, `%+`, `%-`, `%prefix`, or a pid.
    pub fn resolve(&self, spec: &str) -> Option<usize> {
        match spec {
            "" | "%" | "%%" | "%+" => self.current(),
            "%-" => {
                let current = self.current();
                self.jobs.keys().rev().find(|k| Some(**k) != current).copied()
            }
            _ => {
                if let Some(rest) = spec.strip_prefix('%') {
                    if let Ok(id) = rest.parse::<usize>() {
                        return self.jobs.contains_key(&id).then_some(id);
                    }
                    return self
                        .jobs
                        .values()
                        .rev()
                        .find(|job| job.command.starts_with(rest))
                        .map(|job| job.id);
                }
                let pid: i32 = spec.parse().ok()?;
                self.jobs
                    .values()
                    .find(|job| job.group.pgid() == Some(pid))
                    .map(|job| job.id)
            }
        }
    }

    /// Take the task handle so the caller can await it directly (`fg`).
    pub fn take_handle(&mut self, id: usize) -> Option<JoinHandle<ExecResult>> {
        self.jobs.get_mut(&id).and_then(|job| job.handle.take())
    }

    /// Mark a job finished with the given result.
    pub fn finish(&mut self, id: usize, result: ExecResult) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.state = JobState::Done(result.exit_code);
            job.handle = None;
            job.result = Some(result);
        }
    }

    /// Collect jobs whose tasks have finished. Returns `(id, state, command)`
    /// for each newly completed job and drops them from the table.
    pub async fn reap(&mut self) -> Vec<(usize, JobState, String)> {
        let finished: Vec<(usize, String)> = self
            .jobs
            .values()
            .filter(|job| job.is_finished())
            .map(|job| (job.id, job.command.clone()))
            .collect();
        let mut done = Vec::new();
        for (id, command) in finished {
            if let Some(result) = self.wait_for(id).await {
                done.push((id, JobState::Done(result.exit_code), command));
            }
        }
        done
    }

    /// Wait for a specific job to complete and remove it.
    pub async fn wait_for(&mut self, job_id: usize) -> Option<ExecResult> {
        let mut job = self.jobs.remove(&job_id)?;
        if let Some(result) = job.result.take() {
            return Some(result);
        }
        let handle = job.handle.take()?;
        match handle.await {
            Ok(result) => Some(result),
            Err(_) => Some(ExecResult::err("job panicked\n", 1)),
        }
    }

    /// Wait for all jobs to complete
    ///
    /// Returns the exit code of the last job
    pub async fn wait_all(&mut self) -> ExecResult {
        let mut combined = ExecResult::default();
        let ids: Vec<usize> = self.jobs.keys().copied().collect();
        for id in ids {
            if let Some(result) = self.wait_for(id).await {
                combined.absorb(result);
            }
        }
        combined
    }

    /// Wait for a job in the foreground (`fg`).
    ///
    /// With `interruptible`, a SIGINT received while waiting is forwarded to
    /// the job's process group; if the job is still running shortly after,
    /// it stays in the table and `None` is returned.
    pub async fn foreground(&mut self, id: usize, interruptible: bool) -> Option<ExecResult> {
        let joined = {
            let job = self.jobs.get_mut(&id)?;
            if job.result.is_some() {
                None
            } else {
                let handle = job.handle.as_mut()?;
                if interruptible {
                    tokio::select! {
                        joined = &mut *handle => Some(joined),
                        _ = tokio::signal::ctrl_c() => {
                            let _ = job.group.signal(Signal::SIGINT);
                            tokio::time::timeout(FOREGROUND_GRACE, &mut *handle).await.ok()
                        }
                    }
                } else {
                    Some(handle.await)
                }
            }
        };
        match joined {
            Some(joined) => {
                self.jobs.remove(&id);
                Some(joined.unwrap_or_else(|_| ExecResult::err("job panicked\n", 1)))
            }
            None => {
                let finished = self.jobs.get(&id).is_some_and(|job| job.result.is_some());
                if finished {
                    self.jobs.remove(&id).and_then(|mut job| job.result.take())
                } else {
                    None
                }
            }
        }
    }

    /// Deliver a signal to a job.
    ///
    /// Stop and continue signals only change the recorded state. Any other
    /// signal also cancels the job's task, so a job made only of builtins
    /// ends too; its status becomes 128 + the signal number.
    pub fn signal(&mut self, id: usize, signal: Signal) -> nix::Result<()> {
        let job = self.jobs.get_mut(&id).ok_or(nix::errno::Errno::ESRCH)?;
        match signal {
            Signal::SIGSTOP | Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU => {
                job.group.signal(signal)?;
                job.state = JobState::Stopped;
            }
            Signal::SIGCONT => {
                job.group.signal(signal)?;
                if job.state == JobState::Stopped {
                    job.state = JobState::Running;
                }
            }
            _ => {
                let sent = job.group.signal(signal);
                let running = job.handle.as_ref().is_some_and(|h| !h.is_finished());
                if running && let Some(handle) = job.handle.take() {
                    handle.abort();
                    let status = 128 + signal as i32;
                    job.state = JobState::Done(status);
                    job.result = Some(ExecResult::code(status));
                }
                match sent {
                    Ok(_) | Err(nix::errno::Errno::ESRCH) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Forget a job without waiting (`disown`).
    pub fn remove(&mut self, id: usize) -> Option<Job> {
        self.jobs.remove(&id)
    }

    /// Check if there are any active jobs
    pub fn has_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    /// Get the number of active jobs
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_and_wait() {
        let mut table = JobTable::new();
        let handle = tokio::spawn(async { ExecResult::ok("hello") });

        let job_id = table.spawn("echo hello", ProcessGroup::new(), handle);
        assert_eq!(job_id, 1);
        assert_eq!(table.last_job_id(), Some(1));

        let result = table.wait_for(job_id).await.unwrap();
        assert_eq!(result.stdout, "hello");
        assert!(!table.has_jobs());
    }

    #[tokio::test]
    async fn test_wait_all_returns_last_status() {
        let mut table = JobTable::new();
        for i in 0..3 {
            let handle = tokio::spawn(async move { ExecResult::code(i) });
            table.spawn(format!("job {}", i), ProcessGroup::new(), handle);
        }
        assert_eq!(table.job_count(), 3);

        let result = table.wait_all().await;
        assert_eq!(result.exit_code, 2);
        assert!(!table.has_jobs());
    }

    #[tokio::test]
    async fn test_resolve_specs() {
        let mut table = JobTable::new();
        table.spawn("sleep 10", ProcessGroup::new(), tokio::spawn(async { ExecResult::code(0) }));
        table.spawn("make all", ProcessGroup::new(), tokio::spawn(async { ExecResult::code(0) }));

        assert_eq!(table.resolve("%1"), Some(1));
        assert_eq!(table.resolve("%%"), Some(2));
        assert_eq!(table.resolve("%-"), Some(1));
        assert_eq!(table.resolve("%make"), Some(2));
        assert_eq!(table.resolve("%9"), None);
        assert_eq!(table.marker(2), '+');
        assert_eq!(table.marker(1), '-');
        table.wait_all().await;
    }

    #[tokio::test]
    async fn test_ids_reused_after_table_empties() {
        let mut table = JobTable::new();
        let id = table.spawn("a", ProcessGroup::new(), tokio::spawn(async { ExecResult::code(0) }));
        table.wait_for(id).await;
        let id = table.spawn("b", ProcessGroup::new(), tokio::spawn(async { ExecResult::code(0) }));
        assert_eq!(id, 1);
        table.wait_all().await;
    }

    #[tokio::test]
    async fn test_process_group_claim_once() {
        let group = ProcessGroup::new();
        assert_eq!(group.pgid(), None);
        group.claim(42);
        group.claim(43);
        assert_eq!(group.pgid(), Some(42));
        let waited = group
            .wait_claimed(std::time::Duration::from_millis(10))
            .await;
        assert_eq!(waited, Some(42));
    }

    #[tokio::test]
    async fn test_reap_collects_finished() {
        let mut table = JobTable::new();
        table.spawn("true", ProcessGroup::new(), tokio::spawn(async { ExecResult::code(3) }));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let done = table.reap().await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].1, JobState::Done(3));
        assert_eq!(done[0].2, "true");
        assert!(!table.has_jobs());
    }
    #[tokio::test]
    async fn test_signal_cancels_in_process_job() {
        let mut table = JobTable::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            ExecResult::code(0)
        });
        let id = table.spawn("spin", ProcessGroup::new(), handle);
        table.signal(id, Signal::SIGTERM).unwrap();
        let result = table.foreground(id, false).await.unwrap();
        assert_eq!(result.exit_code, 143);
        assert!(!table.has_jobs());
        assert!(table.signal(id, Signal::SIGTERM).is_err());
    }

    #[tokio::test]
    async fn test_foreground_waits_for_result() {
        let mut table = JobTable::new();
        let id = table.spawn("x", ProcessGroup::new(), tokio::spawn(async { ExecResult::ok("out") }));
        let result = table.foreground(id, false).await.unwrap();
        assert_eq!(result.stdout, "out");
        assert_eq!(table.foreground(id, false).await, None);
    }
}
