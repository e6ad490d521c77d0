//! Process supervision for job executions.
//!
//! Each execution runs `<shell> -c <command>` as the leader of a new process
//! group. A task per execution forwards output and the final outcome to the
//! daemon's owner loop as [`SupervisorMsg`]s. All output for an execution
//! is sent before its `Finished` message.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::jobs::JobSpec;
use crate::jobs::process::{exit_signal, graceful_stop, signal_name};
use crate::registry::{Completion, ExecutionStatus, ResourceUsage, Stream};

/// How long output pipes may stay open after the leader exits, when a
/// background grandchild still holds them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Interval between resource usage samples.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Read size for output pipes.
const CHUNK_SIZE: usize = 8192;

#[derive(Debug)]
pub enum SupervisorMsg {
    Output {
        execution_id: String,
        stream: Stream,
        chunk: String,
    },
    Finished {
        execution_id: String,
        job_id: String,
        completion: Completion,
    },
}

/// How to run executions.
#[derive(Debug, Clone)]
pub struct Supervisor {
    shell: PathBuf,
    stop_grace: Duration,
    messages: mpsc::UnboundedSender<SupervisorMsg>,
}

/// Handle to a live execution, owned by the daemon loop.
#[derive(Debug)]
pub struct RunningExecution {
    pub execution_id: String,
    pub job_id: String,
    pub pid: Option<u32>,
    stop: Option<oneshot::Sender<()>>,
}

impl RunningExecution {
    /// Ask the execution to stop: SIGTERM to its group, SIGKILL after the
    /// grace period. Returns false if a stop was already requested.
    pub fn request_stop(&mut self) -> bool {
        match self.stop.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_none()
    }
}

impl Supervisor {
    pub fn new(
        shell: impl Into<PathBuf>,
        stop_grace: Duration,
        messages: mpsc::UnboundedSender<SupervisorMsg>,
    ) -> Self {
        Self {
            shell: shell.into(),
            stop_grace,
            messages,
        }
    }

    /// Start an execution of `job`. Fails only if the process could not be
    /// spawned; everything after that is reported through messages.
    pub fn spawn(&self, job: &JobSpec, execution_id: &str) -> std::io::Result<RunningExecution> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&job.command)
            .envs(&job.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(cwd) = &job.cwd {
            command.current_dir(cwd);
        }

        let child = command.spawn()?;
        let pid = child.id();
        debug!(job_id = %job.id, execution_id, pid, "spawned job process");

        let (stop_tx, stop_rx) = oneshot::channel();
        let timeout = job.timeout_ms.map(Duration::from_millis);
        tokio::spawn(supervise(
            child,
            execution_id.to_string(),
            job.id.clone(),
            timeout,
            self.stop_grace,
            stop_rx,
            self.messages.clone(),
        ));

        Ok(RunningExecution {
            execution_id: execution_id.to_string(),
            job_id: job.id.clone(),
            pid,
            stop: Some(stop_tx),
        })
    }
}

enum Ending {
    Exited,
    Stopped,
    TimedOut,
}

async fn supervise(
    mut child: Child,
    execution_id: String,
    job_id: String,
    timeout: Option<Duration>,
    grace: Duration,
    stop_rx: oneshot::Receiver<()>,
    messages: mpsc::UnboundedSender<SupervisorMsg>,
) {
    let mut readers = {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let id = execution_id.clone();
        let tx = messages.clone();
        tokio::spawn(async move {
            tokio::join!(
                forward(stdout, Stream::Stdout, &id, &tx),
                forward(stderr, Stream::Stderr, &id, &tx),
            );
        })
    };

    let pid = child.id();
    let mut usage = None;
    let mut sampler = tokio::time::interval(SAMPLE_INTERVAL);
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    tokio::pin!(stop_rx);

    let ending = loop {
        tokio::select! {
            _ = child.wait() => break Ending::Exited,
            result = &mut stop_rx => {
                // A dropped handle means the daemon is going away
                if result.is_err() {
                    debug!(%execution_id, "supervisor handle dropped, stopping");
                }
                break Ending::Stopped;
            }
            _ = &mut deadline => break Ending::TimedOut,
            _ = sampler.tick() => {
                if let Some(sample) = pid.and_then(sample_usage) {
                    usage = Some(sample);
                }
            }
        }
    };

    let status = match ending {
        Ending::Exited => child.wait().await,
        Ending::Stopped | Ending::TimedOut => graceful_stop(&mut child, grace).await,
    };

    if tokio::time::timeout(DRAIN_TIMEOUT, &mut readers).await.is_err() {
        debug!(%execution_id, "output still open after exit, abandoning it");
        readers.abort();
    }

    let mut completion = match (&ending, status) {
        (_, Err(e)) => {
            let mut c = Completion::new(ExecutionStatus::Failed);
            c.error = Some(format!("wait failed: {}", e));
            c
        }
        (Ending::Stopped, Ok(status)) => {
            let mut c = Completion::new(ExecutionStatus::Stopped);
            c.exit_code = status.code();
            c.signal = exit_signal(status);
            c
        }
        (Ending::TimedOut, Ok(status)) => {
            let mut c = Completion::new(ExecutionStatus::TimedOut);
            c.exit_code = status.code();
            c.signal = exit_signal(status);
            c.error = timeout.map(|t| format!("timed out after {} ms", t.as_millis()));
            c
        }
        (Ending::Exited, Ok(status)) => match (status.code(), exit_signal(status)) {
            (Some(0), _) => {
                let mut c = Completion::new(ExecutionStatus::Succeeded);
                c.exit_code = Some(0);
                c
            }
            (Some(code), _) => {
                let mut c = Completion::new(ExecutionStatus::Failed);
                c.exit_code = Some(code);
                c
            }
            (None, signal) => {
                let mut c = Completion::new(ExecutionStatus::Killed);
                c.signal = signal;
                c.error = signal.map(|s| format!("killed by {}", signal_name(s)));
                c
            }
        },
    };
    completion.usage = usage;

    if messages
        .send(SupervisorMsg::Finished {
            execution_id: execution_id.clone(),
            job_id,
            completion,
        })
        .is_err()
    {
        warn!(%execution_id, "daemon loop gone before execution finished");
    }
}

/// Forward a pipe as output messages, keeping multi-byte characters whole
/// across reads.
async fn forward<R: AsyncRead + Unpin>(
    reader: Option<R>,
    stream: Stream,
    execution_id: &str,
    tx: &mpsc::UnboundedSender<SupervisorMsg>,
) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(execution_id, error = %e, "output read failed");
                break;
            }
        };
        pending.extend_from_slice(&buf[..n]);
        let chunk = take_complete_utf8(&mut pending);
        if !chunk.is_empty() {
            send_output(tx, execution_id, stream, chunk);
        }
    }
    if !pending.is_empty() {
        send_output(tx, execution_id, stream, String::from_utf8_lossy(&pending).into_owned());
    }
}

fn send_output(
    tx: &mpsc::UnboundedSender<SupervisorMsg>,
    execution_id: &str,
    stream: Stream,
    chunk: String,
) {
    let _ = tx.send(SupervisorMsg::Output {
        execution_id: execution_id.to_string(),
        stream,
        chunk,
    });
}

/// Remove and return the longest prefix of `pending` that ends on a
/// character boundary. Invalid bytes are replaced.
fn take_complete_utf8(pending: &mut Vec<u8>) -> String {
    let keep = match std::str::from_utf8(pending) {
        Ok(_) => 0,
        // Truncated sequence at the end: hold it for the next read
        Err(e) if e.error_len().is_none() => pending.len() - e.valid_up_to(),
        Err(_) => 0,
    };
    let rest = pending.split_off(pending.len() - keep);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

/// CPU time and peak RSS of a live process, from procfs.
#[cfg(target_os = "linux")]
fn sample_usage(pid: u32) -> Option<ResourceUsage> {
    // procfs reports CPU time in USER_HZ, which is 100 on Linux
    const TICK_MS: u64 = 10;

    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // Fields after the parenthesised command name, which may contain spaces
    let fields: Vec<&str> = stat.rsplit_once(')')?.1.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;

    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    let max_rss_kb = status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|v| v.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Some(ResourceUsage {
        user_ms: utime * TICK_MS,
        system_ms: stime * TICK_MS,
        max_rss_kb,
    })
}

#[cfg(not(target_os = "linux"))]
fn sample_usage(_pid: u32) -> Option<ResourceUsage> {
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::jobs::NewJob;
    use chrono::Utc;

    fn job(command: &str) -> JobSpec {
        JobSpec::create(NewJob::new("t", command), Utc::now()).unwrap()
    }

    async fn run(
        supervisor: &Supervisor,
        rx: &mut mpsc::UnboundedReceiver<SupervisorMsg>,
        spec: &JobSpec,
    ) -> (String, String, Completion) {
        let _handle = supervisor.spawn(spec, "exec-test").unwrap();
        collect(rx).await
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<SupervisorMsg>) -> (String, String, Completion) {
        let mut stdout = String::new();
        let mut stderr = String::new();
        loop {
            match rx.recv().await.unwrap() {
                SupervisorMsg::Output { stream, chunk, .. } => match stream {
                    Stream::Stdout => stdout.push_str(&chunk),
                    Stream::Stderr => stderr.push_str(&chunk),
                },
                SupervisorMsg::Finished { completion, .. } => return (stdout, stderr, completion),
            }
        }
    }

    fn supervisor() -> (Supervisor, mpsc::UnboundedReceiver<SupervisorMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Supervisor::new("/bin/sh", Duration::from_millis(200), tx), rx)
    }

    #[tokio::test]
    async fn test_success_captures_output() {
        let (supervisor, mut rx) = supervisor();
        let (out, err, completion) =
            run(&supervisor, &mut rx, &job("echo hello; echo oops >&2")).await;
        assert_eq!(out, "hello\n");
        assert_eq!(err, "oops\n");
        assert_eq!(completion.status, ExecutionStatus::Succeeded);
        assert_eq!(completion.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_env_and_cwd() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut spec = job("echo \"$GREETING\"; pwd");
        spec.env.insert("GREETING".into(), "hi there".into());
        spec.cwd = Some(dir.path().canonicalize().unwrap());
        let (supervisor, mut rx) = supervisor();
        let (out, _, _) = run(&supervisor, &mut rx, &spec).await;
        let expected = format!("hi there\n{}\n", dir.path().canonicalize().unwrap().display());
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_failure_exit_code() {
        let (supervisor, mut rx) = supervisor();
        let (_, _, completion) = run(&supervisor, &mut rx, &job("exit 7")).await;
        assert_eq!(completion.status, ExecutionStatus::Failed);
        assert_eq!(completion.exit_code, Some(7));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut spec = job("sleep 30");
        spec.timeout_ms = Some(100);
        let (supervisor, mut rx) = supervisor();
        let (_, _, completion) = run(&supervisor, &mut rx, &spec).await;
        assert_eq!(completion.status, ExecutionStatus::TimedOut);
        assert_eq!(completion.error.as_deref(), Some("timed out after 100 ms"));
    }

    #[tokio::test]
    async fn test_stop_request() {
        let (supervisor, mut rx) = supervisor();
        let mut handle = supervisor.spawn(&job("sleep 30"), "exec-stop").unwrap();
        assert!(handle.request_stop());
        assert!(!handle.request_stop());
        assert!(handle.stop_requested());
        let (_, _, completion) = collect(&mut rx).await;
        assert_eq!(completion.status, ExecutionStatus::Stopped);
        assert_eq!(completion.signal, Some(nix::sys::signal::Signal::SIGTERM as i32));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let (supervisor, mut rx) = supervisor();
        let mut handle = supervisor
            .spawn(&job("trap '' TERM; sleep 30"), "exec-stubborn")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.request_stop();
        let (_, _, completion) = collect(&mut rx).await;
        assert_eq!(completion.status, ExecutionStatus::Stopped);
        assert_eq!(completion.signal, Some(nix::sys::signal::Signal::SIGKILL as i32));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new("/nonexistent/shell", Duration::from_millis(10), tx);
        assert!(supervisor.spawn(&job("true"), "exec-x").is_err());
    }

    #[test]
    fn test_take_complete_utf8_holds_partial_char() {
        let mut pending = "héllo".as_bytes().to_vec();
        pending.truncate(2); // "h" plus the first byte of "é"
        assert_eq!(take_complete_utf8(&mut pending), "h");
        assert_eq!(pending.len(), 1);
        pending.extend_from_slice(&"é".as_bytes()[1..]);
        assert_eq!(take_complete_utf8(&mut pending), "é");
        assert!(pending.is_empty());
    }
}
