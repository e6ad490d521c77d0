//! Filtering over execution history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{ExecutionRecord, ExecutionStatus};

/// Default number of results when a query sets no limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Criteria for [`Registry::search`](super::Registry::search). Every set
/// field must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    pub job_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    /// Case-insensitive substring of job name, output or error
    pub text: Option<String>,
    /// Started at or after
    pub since: Option<DateTime<Utc>>,
    /// Started before
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT)
    }

    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        if let Some(job_id) = &self.job_id
            && record.job_id != *job_id
        {
            return false;
        }
        if let Some(status) = self.status
            && record.status != status
        {
            return false;
        }
        if let Some(since) = self.since
            && record.started_at < since
        {
            return false;
        }
        if let Some(until) = self.until
            && record.started_at >= until
        {
            return false;
        }
        match &self.text {
            Some(text) if !text.is_empty() => {
                let needle = text.to_lowercase();
                [
                    Some(record.job_name.as_str()),
                    Some(record.stdout.as_str()),
                    Some(record.stderr.as_str()),
                    record.error.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|haystack| haystack.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::record::Trigger;
    use chrono::{Duration, TimeZone};

    fn record(job_id: &str, hour: i64, status: ExecutionStatus) -> ExecutionRecord {
        ExecutionRecord {
            id: format!("exec-{}-{}", job_id, hour),
            job_id: job_id.into(),
            job_name: format!("{} job", job_id),
            attempt: 1,
            trigger: Trigger::Manual,
            status,
            started_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
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
    fn test_empty_query_matches_everything() {
        let q = SearchQuery::new();
        assert!(q.matches(&record("a", 0, ExecutionStatus::Running)));
        assert_eq!(q.effective_limit(), DEFAULT_SEARCH_LIMIT);
    }

    #[test]
    fn test_filters_combine() {
        let mut r = record("a", 5, ExecutionStatus::Failed);
        r.stderr = "Disk FULL on /dev/sda1\n".into();

        let base = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert!(SearchQuery::new().job("a").matches(&r));
        assert!(!SearchQuery::new().job("b").matches(&r));
        assert!(SearchQuery::new().status(ExecutionStatus::Failed).matches(&r));
        assert!(!SearchQuery::new().status(ExecutionStatus::Succeeded).matches(&r));
        assert!(SearchQuery::new().text("disk full").matches(&r));
        assert!(SearchQuery::new().text("A JOB").matches(&r));
        assert!(!SearchQuery::new().text("network").matches(&r));
        assert!(SearchQuery::new().since(base + Duration::hours(5)).matches(&r));
        assert!(!SearchQuery::new().until(base + Duration::hours(5)).matches(&r));
        assert!(
            SearchQuery::new()
                .job("a")
                .status(ExecutionStatus::Failed)
                .text("sda")
                .matches(&r)
        );
    }

    #[test]
    fn test_query_deserializes_from_camel_case() {
        let q: SearchQuery =
            serde_json::from_str(r#"{"jobId":"job-1","status":"timed_out","limit":3}"#).unwrap();
        assert_eq!(q.job_id.as_deref(), Some("job-1"));
        assert_eq!(q.status, Some(ExecutionStatus::TimedOut));
        assert_eq!(q.effective_limit(), 3);
    }
}
