//! One execution attempt of a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::process::{TRUNCATION_MARKER, truncate_output_tail};

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    /// Stopped by the per-job timeout
    TimedOut,
    /// Stopped on request
    Stopped,
    /// Ended by a signal nobody asked for, or lost with the daemon
    Killed,
}

impl ExecutionStatus {
    pub fn is_finished(self) -> bool {
        self != ExecutionStatus::Running
    }

    /// Whether the execution counts against the job's success rate.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Failed | ExecutionStatus::TimedOut | ExecutionStatus::Killed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
            ExecutionStatus::Stopped => "stopped",
            ExecutionStatus::Killed => "killed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "running" => ExecutionStatus::Running,
            "succeeded" => ExecutionStatus::Succeeded,
            "failed" => ExecutionStatus::Failed,
            "timed_out" => ExecutionStatus::TimedOut,
            "stopped" => ExecutionStatus::Stopped,
            "killed" => ExecutionStatus::Killed,
            other => return Err(format!("unknown execution status: {}", other)),
        })
    }
}

/// What started an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
    Retry,
}

/// Output stream of a job process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// CPU time and peak memory of an execution's processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub user_ms: u64,
    pub system_ms: u64,
    pub max_rss_kb: u64,
}

/// Final state reported for an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub error: Option<String>,
    pub usage: Option<ResourceUsage>,
}

impl Completion {
    pub fn new(status: ExecutionStatus) -> Self {
        Self {
            status,
            exit_code: None,
            signal: None,
            error: None,
            usage: None,
        }
    }
}

/// Append-only record of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub job_id: String,
    pub job_name: String,
    /// 1-based attempt within the trigger
    pub attempt: u32,
    pub trigger: Trigger,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub signal: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub usage: Option<ResourceUsage>,
}

impl ExecutionRecord {
    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    /// Append output, keeping the last `max_bytes` of each stream.
    pub(crate) fn push_output(&mut self, stream: Stream, chunk: &str, max_bytes: usize) {
        let buffer = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        let mut bytes = std::mem::take(buffer).into_bytes();
        let was_truncated = bytes.starts_with(TRUNCATION_MARKER.as_bytes());
        if was_truncated {
            bytes.drain(..TRUNCATION_MARKER.len());
        }
        bytes.extend_from_slice(chunk.as_bytes());
        *buffer = if was_truncated || bytes.len() > max_bytes {
            let text = truncate_output_tail(&bytes, max_bytes);
            if text.starts_with(TRUNCATION_MARKER) {
                text
            } else {
                format!("{}{}", TRUNCATION_MARKER, text)
            }
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };
    }

    /// Close the record. The end time never precedes the start.
    pub(crate) fn complete(&mut self, completion: Completion, now: DateTime<Utc>) {
        let ended_at = now.max(self.started_at);
        self.status = completion.status;
        self.exit_code = completion.exit_code;
        self.signal = completion.signal;
        self.error = completion.error;
        self.usage = completion.usage;
        self.duration_ms = u64::try_from((ended_at - self.started_at).num_milliseconds()).ok();
        self.ended_at = Some(ended_at);
    }

    /// Copy with output cut to `max_bytes` per stream, for transmission.
    pub fn sanitized(&self, max_bytes: usize) -> Self {
        let mut copy = self.clone();
        for buffer in [&mut copy.stdout, &mut copy.stderr] {
            if buffer.len() > max_bytes {
                let body = buffer.strip_prefix(TRUNCATION_MARKER);
                let source = body.unwrap_or(buffer.as_str());
                let mut text = truncate_output_tail(source.as_bytes(), max_bytes);
                if body.is_some() && !text.starts_with(TRUNCATION_MARKER) {
                    text.insert_str(0, TRUNCATION_MARKER);
                }
                *buffer = text;
            }
        }
        copy
    }

    /// Short description of why the execution failed, for clustering.
    pub fn failure_message(&self) -> Option<String> {
        if !self.status.is_failure() {
            return None;
        }
        if let Some(error) = self.error.as_deref().filter(|e| !e.trim().is_empty()) {
            return Some(error.trim().to_string());
        }
        if let Some(line) = self
            .stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty() && *l != TRUNCATION_MARKER.trim_end())
        {
            return Some(line.to_string());
        }
        Some(match (self.exit_code, self.signal) {
            (_, Some(signal)) => format!("killed by signal {}", signal),
            (Some(code), None) => format!("exit code {}", code),
            (None, None) => self.status.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record() -> ExecutionRecord {
        ExecutionRecord {
            id: "exec-1".into(),
            job_id: "job-1".into(),
            job_name: "backup".into(),
            attempt: 1,
            trigger: Trigger::Manual,
            status: ExecutionStatus::Running,
            started_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            ended_at: None,
            duration_ms: None,
            exit_code: None,
            signal: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            usage: None,
        }
    }

    #[test]
    fn test_output_is_bounded() {
        let mut r = record();
        r.push_output(Stream::Stdout, "hello ", 8);
        r.push_output(Stream::Stdout, "world", 8);
        assert!(r.stdout.starts_with(TRUNCATION_MARKER));
        assert!(r.stdout.ends_with("lo world"));
        r.push_output(Stream::Stderr, "err", 8);
        assert_eq!(r.stderr, "err");
    }

    #[test]
    fn test_complete_never_ends_before_start() {
        let mut r = record();
        let earlier = r.started_at - Duration::seconds(5);
        r.complete(Completion::new(ExecutionStatus::Succeeded), earlier);
        assert_eq!(r.ended_at, Some(r.started_at));
        assert_eq!(r.duration_ms, Some(0));

        let mut r = record();
        let later = r.started_at + Duration::milliseconds(1500);
        r.complete(Completion::new(ExecutionStatus::Succeeded), later);
        assert_eq!(r.duration_ms, Some(1500));
    }

    #[test]
    fn test_failure_message_sources() {
        let mut r = record();
        r.status = ExecutionStatus::Failed;
        r.exit_code = Some(3);
        assert_eq!(r.failure_message().as_deref(), Some("exit code 3"));
        r.stderr = "warming up\nconnection refused\n\n".into();
        assert_eq!(r.failure_message().as_deref(), Some("connection refused"));
        r.error = Some("spawn failed".into());
        assert_eq!(r.failure_message().as_deref(), Some("spawn failed"));
        r.status = ExecutionStatus::Succeeded;
        assert_eq!(r.failure_message(), None);
    }

    #[test]
    fn test_status_names_round_trip_through_serde() {
        let json = serde_json::to_string(&ExecutionStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        assert_eq!("timed_out".parse::<ExecutionStatus>(), Ok(ExecutionStatus::TimedOut));
    }
}
