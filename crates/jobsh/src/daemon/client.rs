//! Client for the daemon's control socket.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::config::DaemonConfig;
use super::protocol::{
    Command, DaemonStatus, MAX_LINE_BYTES, Request, Response, decode_line, encode_line,
};
use crate::error::{DaemonError, Error, JobError, Result};
use crate::jobs::{JobManager, JobSpec, NewJob};
use crate::registry::{ExecutionRecord, JobStats, SearchQuery};

/// Result of `triggerJob`: the job as it stands after the run, and the run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TriggerResult {
    /// `None` if the job was removed while it ran
    pub job: Option<JobSpec>,
    pub execution: ExecutionRecord,
}

/// Talks to a daemon over its Unix socket, one connection per request.
///
/// A request with no response within the timeout fails with
/// [`DaemonError::Timeout`]; the daemon may still have applied it.
#[derive(Debug)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
    next_id: AtomicU64,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DaemonConfig::default().request_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(&config.socket_path).with_timeout(config.request_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn status(&self) -> Result<DaemonStatus> {
        self.call(Command::Status, json!({})).await
    }

    /// Run a job now and wait for it to finish, up to `wait`.
    pub async fn trigger(&self, id: &str, wait: Duration) -> Result<TriggerResult> {
        self.call_with_timeout(Command::TriggerJob, json!({ "id": id }), wait)
            .await
    }

    /// Stop all executions and reload the job table.
    pub async fn restart(&self) -> Result<DaemonStatus> {
        self.call(Command::Restart, json!({})).await
    }

    /// Ask the daemon to exit.
    pub async fn shutdown(&self) -> Result<DaemonStatus> {
        self.call(Command::Stop, json!({})).await
    }

    pub async fn stats(&self, id: &str) -> Result<JobStats> {
        self.call(Command::JobStats, json!({ "id": id })).await
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<ExecutionRecord>> {
        let args = serde_json::to_value(query)
            .map_err(|e| DaemonError::Protocol(format!("encode query: {}", e)))?;
        self.call(Command::SearchHistory, args).await
    }

    async fn call<T: DeserializeOwned>(&self, command: Command, args: Value) -> Result<T> {
        self.call_with_timeout(command, args, self.timeout).await
    }

    async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        command: Command,
        args: Value,
        timeout: Duration,
    ) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(id, command, args);
        debug!(request_id = id, %command, "sending request");

        let exchange = self.exchange(&request);
        let response = match tokio::time::timeout(timeout, exchange).await {
            Ok(response) => response?,
            Err(_) => {
                return Err(DaemonError::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                )
                .into());
            }
        };

        if response.id != id {
            return Err(DaemonError::Protocol(format!(
                "response id {} does not match request {}",
                response.id, id
            ))
            .into());
        }
        if !response.ok {
            let body = response.error.unwrap_or_else(|| super::protocol::ErrorBody {
                code: "UNKNOWN".into(),
                message: "request failed without an error".into(),
            });
            return Err(remote_error(body.code, body.message));
        }
        let data = response.data.unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(|e| {
            DaemonError::Protocol(format!("unexpected {} response: {}", command, e)).into()
        })
    }

    async fn exchange(&self, request: &Request) -> Result<Response> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    DaemonError::NotRunning(self.socket_path.display().to_string())
                }
                _ => DaemonError::Io(e),
            }
        })?;
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(&encode_line(request)?)
            .await
            .map_err(DaemonError::from)?;

        let mut reader = BufReader::new(read_half).take(MAX_LINE_BYTES as u64 + 1);
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(DaemonError::from)?;
        if n == 0 {
            return Err(DaemonError::Protocol("connection closed without a response".into()).into());
        }
        Ok(decode_line(&line)?)
    }
}

/// Map a remote error back to the local type it came from.
fn remote_error(code: String, message: String) -> Error {
    let job_error = match code.as_str() {
        "JOB_NOT_FOUND" => Some(JobError::NotFound(strip_prefix(&message, "job not found: "))),
        "JOB_ALREADY_RUNNING" => Some(JobError::AlreadyRunning(strip_prefix(
            &message,
            "job already running: ",
        ))),
        "JOB_NOT_RUNNING" => Some(JobError::NotRunning(strip_prefix(
            &message,
            "job not running: ",
        ))),
        "JOB_INVALID" => Some(JobError::Invalid(strip_prefix(&message, "invalid job: "))),
        _ => None,
    };
    match job_error {
        Some(e) => e.into(),
        None => DaemonError::Remote { code, message }.into(),
    }
}

fn strip_prefix(message: &str, prefix: &str) -> String {
    message.strip_prefix(prefix).unwrap_or(message).to_string()
}

#[async_trait]
impl JobManager for DaemonClient {
    async fn add(&self, job: NewJob) -> Result<JobSpec> {
        let args = serde_json::to_value(&job)
            .map_err(|e| DaemonError::Protocol(format!("encode job: {}", e)))?;
        self.call(Command::AddJob, args).await
    }

    async fn start(&self, id: &str) -> Result<JobSpec> {
        self.call(Command::StartJob, json!({ "id": id })).await
    }

    async fn stop(&self, id: &str) -> Result<JobSpec> {
        self.call(Command::StopJob, json!({ "id": id })).await
    }

    async fn remove(&self, id: &str) -> Result<JobSpec> {
        self.call(Command::RemoveJob, json!({ "id": id })).await
    }

    async fn get(&self, id: &str) -> Result<JobSpec> {
        self.call(Command::GetJob, json!({ "id": id })).await
    }

    async fn list(&self) -> Result<Vec<JobSpec>> {
        self.call(Command::ListJobs, json!({})).await
    }

    async fn history(&self, id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        self.call(Command::JobHistory, json!({ "id": id, "limit": limit }))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remote_errors_map_back() {
        match remote_error("JOB_NOT_RUNNING".into(), "job not running: job-1".into()) {
            Error::Job(JobError::NotRunning(id)) => assert_eq!(id, "job-1"),
            other => panic!("unexpected {:?}", other),
        }
        match remote_error("INTERNAL".into(), "disk full".into()) {
            Error::Daemon(e) => assert_eq!(e.code(), "INTERNAL"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_daemon_is_not_running() {
        let dir = TempDir::new().unwrap();
        let client = DaemonClient::new(dir.path().join("missing.sock"));
        match client.status().await {
            Err(Error::Daemon(e)) => assert_eq!(e.code(), "DAEMON_NOT_RUNNING"),
            other => panic!("unexpected {:?}", other.map(|s| s.pid)),
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("silent.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        // Accept and hold the connection without answering
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let client = DaemonClient::new(&path).with_timeout(Duration::from_millis(100));
        match client.list().await {
            Err(Error::Daemon(DaemonError::Timeout(ms))) => assert_eq!(ms, 100),
            other => panic!("unexpected {:?}", other.map(|j| j.len())),
        }
        server.abort();
    }
}
