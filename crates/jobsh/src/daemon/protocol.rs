//! Control socket protocol.
//!
//! Newline-delimited JSON. Each request line carries a client-chosen `id`,
//! a `command` and an `args` object; the daemon answers with one response
//! line with the same `id`. Responses on one connection come back in
//! request order.
//!
//! ```text
//! -> {"id":1,"command":"stopJob","args":{"id":"job-3f2a9c1b7d4e"}}
//! <- {"id":1,"ok":false,"error":{"code":"JOB_NOT_RUNNING","message":"job not running: job-3f2a9c1b7d4e"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DaemonError, Error};

/// Longest request or response line accepted.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Commands the daemon serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    Status,
    AddJob,
    StartJob,
    TriggerJob,
    StopJob,
    ListJobs,
    GetJob,
    RemoveJob,
    Restart,
    Stop,
    JobHistory,
    JobStats,
    SearchHistory,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::AddJob => "addJob",
            Command::StartJob => "startJob",
            Command::TriggerJob => "triggerJob",
            Command::StopJob => "stopJob",
            Command::ListJobs => "listJobs",
            Command::GetJob => "getJob",
            Command::RemoveJob => "removeJob",
            Command::Restart => "restart",
            Command::Stop => "stop",
            Command::JobHistory => "jobHistory",
            Command::JobStats => "jobStats",
            Command::SearchHistory => "searchHistory",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

impl Request {
    pub fn new(id: u64, command: Command, args: Value) -> Self {
        Self { id, command, args }
    }

    /// Deserialize `args` into the command's argument type.
    pub fn args<T: serde::de::DeserializeOwned>(&self) -> Result<T, DaemonError> {
        serde_json::from_value(self.args.clone()).map_err(|e| {
            DaemonError::Protocol(format!("invalid arguments for {}: {}", self.command, e))
        })
    }
}

/// Structured error carried in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(error: &Error) -> Self {
        let code = match error {
            Error::Job(e) => e.code().to_string(),
            Error::Daemon(e) => e.code().to_string(),
            Error::Io(_) => "IO_ERROR".to_string(),
            _ => "INTERNAL".to_string(),
        };
        let message = match error {
            // Avoid "CODE: message" twice over
            Error::Daemon(DaemonError::Remote { message, .. }) => message.clone(),
            other => other.to_string(),
        };
        Self { code, message }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(id: u64, data: Value) -> Self {
        Self {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: u64, error: &Error) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(ErrorBody::from(error)),
        }
    }
}

/// Arguments naming one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobIdArgs {
    pub id: String,
}

/// Arguments of `jobHistory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryArgs {
    pub id: String,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

pub fn default_history_limit() -> usize {
    20
}

/// Payload of `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub pid: u32,
    pub version: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub uptime_ms: u64,
    pub jobs: usize,
    pub running: usize,
    pub socket_path: String,
    pub state_dir: String,
}

/// Encode a message as one protocol line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, DaemonError> {
    let mut line = serde_json::to_vec(message)
        .map_err(|e| DaemonError::Protocol(format!("encode: {}", e)))?;
    line.push(b'\n');
    Ok(line)
}

/// Decode one protocol line.
pub fn decode_line<T: serde::de::DeserializeOwned>(line: &str) -> Result<T, DaemonError> {
    serde_json::from_str(line.trim_end()).map_err(|e| DaemonError::Protocol(e.to_string()))
}
