//! Job registry: execution history and the statistics derived from it.
//!
//! The daemon's owner loop is the only writer. It calls
//! [`Registry::record_start`], [`Registry::record_output`] and
//! [`Registry::record_completion`] as supervisor messages arrive, in order,
//! then [`Registry::save`]. Reads never change stored records.
//!
//! Records are kept in start order. Statistics are computed on read.

mod manager;
mod record;
mod retention;
mod search;
mod stats;

pub use manager::RegistryManager;
pub use record::{Completion, ExecutionRecord, ExecutionStatus, ResourceUsage, Stream, Trigger};
pub use retention::RetentionPolicy;
pub use search::{DEFAULT_SEARCH_LIMIT, SearchQuery};
pub use stats::{FailureCluster, JobStats, Trend, normalize_message};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::daemon::store::write_atomic;
use crate::error::{Error, Result};
use crate::jobs::JobSpec;
use crate::jobs::process::DEFAULT_MAX_OUTPUT_BYTES;

/// On-disk layout of `registry.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryFile {
    #[serde(default)]
    records: Vec<ExecutionRecord>,
}

/// Execution history for all jobs.
#[derive(Debug)]
pub struct Registry {
    records: Vec<ExecutionRecord>,
    path: Option<PathBuf>,
    retention: RetentionPolicy,
    max_output_bytes: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::in_memory(RetentionPolicy::default())
    }
}

impl Registry {
    /// Registry that is never written to disk.
    pub fn in_memory(retention: RetentionPolicy) -> Self {
        Self {
            records: Vec::new(),
            path: None,
            retention,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Load `path`, or start empty if it does not exist.
    ///
    /// A file that cannot be parsed is moved aside to `<path>.corrupt` so the
    /// daemon can still start.
    pub async fn open(path: impl Into<PathBuf>, retention: RetentionPolicy) -> Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<RegistryFile>(&bytes) {
                Ok(file) => file.records,
                Err(e) => {
                    let aside = path.with_extension("json.corrupt");
                    tracing::error!(
                        path = %path.display(),
                        error = %e,
                        "registry file is corrupt, moving it aside"
                    );
                    tokio::fs::rename(&path, &aside).await?;
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let mut registry = Self {
            records,
            path: Some(path),
            retention,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        };
        registry.records.sort_by_key(|r| r.started_at);
        Ok(registry)
    }

    /// Cap on stored output per stream of each execution.
    pub fn with_max_output_bytes(mut self, max_bytes: usize) -> Self {
        self.max_output_bytes = max_bytes;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Open a running record for an attempt of `job`. Returns its id.
    pub fn record_start(
        &mut self,
        job: &JobSpec,
        attempt: u32,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> String {
        let id = new_execution_id();
        self.records.push(ExecutionRecord {
            id: id.clone(),
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            attempt,
            trigger,
            status: ExecutionStatus::Running,
            started_at: now,
            ended_at: None,
            duration_ms: None,
            exit_code: None,
            signal: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            usage: None,
        });
        tracing::debug!(job_id = %job.id, execution_id = %id, attempt, "execution started");
        id
    }

    /// Append captured output to a running execution. Output for unknown or
    /// finished executions is dropped.
    pub fn record_output(&mut self, execution_id: &str, stream: Stream, chunk: &str) -> bool {
        let max_bytes = self.max_output_bytes;
        match self.running_mut(execution_id) {
            Some(record) => {
                record.push_output(stream, chunk, max_bytes);
                true
            }
            None => false,
        }
    }

    /// Close a running execution and apply retention.
    ///
    /// Returns the finished record, or `None` if the execution is unknown or
    /// already finished.
    pub fn record_completion(
        &mut self,
        execution_id: &str,
        completion: Completion,
        now: DateTime<Utc>,
    ) -> Option<ExecutionRecord> {
        let record = self.running_mut(execution_id)?;
        record.complete(completion, now);
        let finished = record.clone();
        tracing::debug!(
            job_id = %finished.job_id,
            execution_id,
            status = %finished.status,
            duration_ms = finished.duration_ms,
            "execution finished"
        );

        let evicted = self.retention.apply(&mut self.records);
        if evicted > 0 {
            tracing::debug!(evicted, "retention removed old executions");
        }
        Some(finished)
    }

    /// Mark every running record as killed. Used at daemon startup, when no
    /// process from a previous run can still be supervised.
    pub fn reconcile_orphans(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut orphaned = Vec::new();
        for record in self.records.iter_mut().filter(|r| r.is_running()) {
            let mut completion = Completion::new(ExecutionStatus::Killed);
            completion.error = Some("daemon exited while the execution was running".into());
            record.complete(completion, now);
            tracing::warn!(
                job_id = %record.job_id,
                execution_id = %record.id,
                "orphaned execution marked killed"
            );
            orphaned.push(record.id.clone());
        }
        if !orphaned.is_empty() {
            self.retention.apply(&mut self.records);
        }
        orphaned
    }

    pub fn get(&self, execution_id: &str) -> Option<&ExecutionRecord> {
        self.records.iter().find(|r| r.id == execution_id)
    }

    /// Executions currently running for a job.
    pub fn running(&self, job_id: &str) -> Vec<&ExecutionRecord> {
        self.records
            .iter()
            .filter(|r| r.is_running() && r.job_id == job_id)
            .collect()
    }

    /// A job's executions, newest first.
    pub fn history(&self, job_id: &str, limit: usize) -> Vec<ExecutionRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.job_id == job_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn statistics(&self, job_id: &str) -> JobStats {
        let records: Vec<&ExecutionRecord> =
            self.records.iter().filter(|r| r.job_id == job_id).collect();
        stats::compute(job_id, &records)
    }

    /// Executions matching `query`, newest first.
    pub fn search(&self, query: &SearchQuery) -> Vec<ExecutionRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| query.matches(r))
            .take(query.effective_limit())
            .cloned()
            .collect()
    }

    /// Write the registry to its file, if it has one.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = RegistryFile {
            records: self.records.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| Error::Internal(format!("serialize registry: {}", e)))?;
        write_atomic(path, &json).await?;
        Ok(())
    }

    fn running_mut(&mut self, execution_id: &str) -> Option<&mut ExecutionRecord> {
        self.records
            .iter_mut()
            .rev()
            .find(|r| r.id == execution_id && r.is_running())
    }
}

fn new_execution_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("exec-{}", &id[..12])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::jobs::NewJob;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn job(name: &str) -> JobSpec {
        JobSpec::create(NewJob::new(name, "true"), now()).unwrap()
    }

    fn finish(registry: &mut Registry, id: &str, status: ExecutionStatus, at: DateTime<Utc>) {
        registry
            .record_completion(id, Completion::new(status), at)
            .unwrap();
    }

    #[test]
    fn test_record_lifecycle() {
        let mut registry = Registry::default();
        let spec = job("backup");
        let id = registry.record_start(&spec, 1, Trigger::Manual, now());
        assert!(id.starts_with("exec-"));
        assert!(registry.record_output(&id, Stream::Stdout, "copied 3 files\n"));
        assert_eq!(registry.running(&spec.id).len(), 1);

        let mut completion = Completion::new(ExecutionStatus::Succeeded);
        completion.exit_code = Some(0);
        let done = registry
            .record_completion(&id, completion, now() + Duration::seconds(2))
            .unwrap();
        assert_eq!(done.duration_ms, Some(2000));
        assert_eq!(done.stdout, "copied 3 files\n");

        // Finished records are append-only
        assert!(!registry.record_output(&id, Stream::Stdout, "late"));
        assert!(
            registry
                .record_completion(&id, Completion::new(ExecutionStatus::Failed), now())
                .is_none()
        );
        assert_eq!(registry.get(&id).unwrap().status, ExecutionStatus::Succeeded);
    }

    #[test]
    fn test_history_newest_first_and_reads_do_not_mutate() {
        let mut registry = Registry::default();
        let spec = job("sync");
        let other = job("other");
        for minute in 0..3 {
            let at = now() + Duration::minutes(minute);
            let id = registry.record_start(&spec, 1, Trigger::Scheduled, at);
            finish(&mut registry, &id, ExecutionStatus::Succeeded, at);
        }
        let id = registry.record_start(&other, 1, Trigger::Manual, now());
        finish(&mut registry, &id, ExecutionStatus::Failed, now());

        let history = registry.history(&spec.id, 2);
        assert_eq!(history.len(), 2);
        assert!(history[0].started_at > history[1].started_at);

        let before = registry.len();
        let _ = registry.statistics(&spec.id);
        let _ = registry.search(&SearchQuery::new().status(ExecutionStatus::Failed));
        assert_eq!(registry.len(), before);

        let failed = registry.search(&SearchQuery::new().status(ExecutionStatus::Failed));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job_id, other.id);
    }

    #[test]
    fn test_retention_keeps_running_execution() {
        let mut registry = Registry::in_memory(RetentionPolicy {
            max_per_job: 2,
            max_total: 100,
        });
        let spec = job("noisy");
        let running = registry.record_start(&spec, 1, Trigger::Scheduled, now());
        for minute in 1..=4 {
            let at = now() + Duration::minutes(minute);
            let id = registry.record_start(&spec, 1, Trigger::Scheduled, at);
            finish(&mut registry, &id, ExecutionStatus::Succeeded, at);
        }
        let history = registry.history(&spec.id, 10);
        assert_eq!(history.len(), 3);
        assert!(history.iter().any(|r| r.id == running));
        assert_eq!(registry.statistics(&spec.id).running, 1);
    }

    #[test]
    fn test_reconcile_orphans() {
        let mut registry = Registry::default();
        let spec = job("lost");
        let id = registry.record_start(&spec, 1, Trigger::Scheduled, now());
        let orphaned = registry.reconcile_orphans(now() + Duration::seconds(1));
        assert_eq!(orphaned, vec![id.clone()]);
        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, ExecutionStatus::Killed);
        assert!(record.ended_at.unwrap() >= record.started_at);
        assert!(registry.reconcile_orphans(now()).is_empty());
    }

    #[tokio::test]
    async fn test_save_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        let spec = job("persisted");

        let mut registry = Registry::open(&path, RetentionPolicy::default())
            .await
            .unwrap();
        let id = registry.record_start(&spec, 1, Trigger::Manual, now());
        registry.record_output(&id, Stream::Stderr, "boom\n");
        finish(&mut registry, &id, ExecutionStatus::Failed, now());
        registry.save().await.unwrap();

        let reopened = Registry::open(&path, RetentionPolicy::default())
            .await
            .unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(&id).unwrap().stderr, "boom\n");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{not json").unwrap();
        let registry = Registry::open(&path, RetentionPolicy::default())
            .await
            .unwrap();
        assert!(registry.is_empty());
        assert!(dir.path().join("registry.json.corrupt").exists());
    }
}
