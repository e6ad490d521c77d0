//! Persistent job specifications.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::Schedule;
use crate::error::JobError;

/// Lifecycle of a job spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Running,
    /// Stopped on request
    Stopped,
    Completed,
    Failed,
    /// Killed by a signal nobody asked for, or lost in a daemon crash
    Killed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Created | JobStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Stopped => "stopped",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Killed => "killed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How failed executions are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts per trigger, including the first
    pub max_attempts: u32,
    /// Delay before each retry
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// When to retry after the given failed attempt (1-based), if at all.
    pub fn next_retry(&self, attempt: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if attempt >= self.max_attempts {
            return None;
        }
        let backoff = i64::try_from(self.backoff_ms).ok()?;
        Some(now + Duration::milliseconds(backoff))
    }
}

/// Request to create a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewJob {
    pub name: String,
    pub command: String,
    pub schedule: Option<Schedule>,
    pub priority: i32,
    pub tags: BTreeSet<String>,
    pub retry: Option<RetryPolicy>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub allow_overlap: bool,
    pub enabled: Option<bool>,
}

impl NewJob {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn allow_overlap(mut self, allow: bool) -> Self {
        self.allow_overlap = allow;
        self
    }
}

fn default_true() -> bool {
    true
}

/// A job owned by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub allow_overlap: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    /// Pending retry of a failed execution
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,
    /// Attempts made for the current trigger
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub last_exit_code: Option<i32>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl JobSpec {
    /// Validate a request and build the spec.
    pub fn create(request: NewJob, now: DateTime<Utc>) -> Result<Self, JobError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(JobError::Invalid("name must not be empty".into()));
        }
        if request.command.trim().is_empty() {
            return Err(JobError::Invalid("command must not be empty".into()));
        }
        if let Some(schedule) = &request.schedule {
            schedule.validate()?;
        }
        let retry = request.retry.unwrap_or_default();
        if retry.max_attempts == 0 {
            return Err(JobError::Invalid("retry.maxAttempts must be at least 1".into()));
        }

        let next_run_at = request.schedule.as_ref().and_then(|s| s.next_after(now));
        Ok(Self {
            id: new_job_id(),
            name,
            command: request.command,
            schedule: request.schedule,
            priority: request.priority,
            tags: request.tags,
            retry,
            cwd: request.cwd,
            env: request.env,
            timeout_ms: request.timeout_ms,
            allow_overlap: request.allow_overlap,
            enabled: request.enabled.unwrap_or(true),
            status: JobStatus::Created,
            created_at: now,
            updated_at: now,
            last_run_at: None,
            next_run_at,
            retry_at: None,
            attempt: 0,
            run_count: 0,
            failure_count: 0,
            last_exit_code: None,
            last_error: None,
        })
    }

    /// Whether the scheduler should fire this job at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let scheduled = self.next_run_at.is_some_and(|at| at <= now);
        let retry = self.retry_at.is_some_and(|at| at <= now);
        scheduled || retry
    }

    /// Move the schedule past `now`.
    pub fn advance_schedule(&mut self, now: DateTime<Utc>) {
        self.next_run_at = self.schedule.as_ref().and_then(|s| s.next_after(now));
    }

    pub fn set_status(&mut self, status: JobStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

fn new_job_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("job-{}", &id[..12])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_create_validates() {
        assert!(JobSpec::create(NewJob::new("", "true"), now()).is_err());
        assert!(JobSpec::create(NewJob::new("a", "  "), now()).is_err());
        let bad_cron = NewJob::new("a", "true").schedule(Schedule::Cron("* *".into()));
        assert_eq!(
            JobSpec::create(bad_cron, now()).unwrap_err().code(),
            "JOB_INVALID"
        );
        let zero = NewJob::new("a", "true").retry(RetryPolicy {
            max_attempts: 0,
            backoff_ms: 0,
        });
        assert!(JobSpec::create(zero, now()).is_err());
    }

    #[test]
    fn test_create_defaults() {
        let spec = JobSpec::create(NewJob::new("backup", "tar czf x.tgz ."), now()).unwrap();
        assert!(spec.id.starts_with("job-"));
        assert_eq!(spec.status, JobStatus::Created);
        assert!(spec.enabled);
        assert_eq!(spec.retry.max_attempts, 1);
        assert_eq!(spec.next_run_at, None);
        assert!(!spec.is_due(now()));
    }

    #[test]
    fn test_interval_job_becomes_due() {
        let request = NewJob::new("tick", "date").schedule(Schedule::IntervalMs(60_000));
        let mut spec = JobSpec::create(request, now()).unwrap();
        assert!(!spec.is_due(now()));
        let later = now() + Duration::seconds(60);
        assert!(spec.is_due(later));
        spec.advance_schedule(later);
        assert!(!spec.is_due(later));

        spec.enabled = false;
        assert!(!spec.is_due(later + Duration::hours(1)));
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 500,
        };
        assert_eq!(
            policy.next_retry(1, now()),
            Some(now() + Duration::milliseconds(500))
        );
        assert!(policy.next_retry(3, now()).is_none());
        assert!(RetryPolicy::default().next_retry(1, now()).is_none());
    }

    #[test]
    fn test_serde_round_trip_keeps_fields() {
        let request = NewJob::new("n", "echo hi")
            .schedule(Schedule::Cron("*/5 * * * *".into()))
            .tag("nightly")
            .timeout_ms(1000);
        let spec = JobSpec::create(request, now()).unwrap();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["status"], "created");
        assert_eq!(json["timeoutMs"], 1000);
        let back: JobSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_new_job_accepts_partial_json() {
        let request: NewJob =
            serde_json::from_str(r#"{"name":"x","command":"true","schedule":{"intervalMs":1000}}"#)
                .unwrap();
        assert_eq!(request.schedule, Some(Schedule::IntervalMs(1000)));
        assert!(request.tags.is_empty());
    }
}
