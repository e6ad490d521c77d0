//! Execution registry through its public API: recording, statistics,
//! search, retention and read-only access to saved state.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jobsh::jobs::{JobManager, JobSpec, NewJob};
use jobsh::registry::{
    Completion, ExecutionStatus, Registry, RegistryManager, RetentionPolicy, SearchQuery, Stream,
    Trend, Trigger,
};
use jobsh::{Error, JobError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + Duration::minutes(minute)
}

fn job(name: &str) -> JobSpec {
    JobSpec::create(NewJob::new(name, "run.sh"), at(0)).unwrap()
}

/// Record one finished execution starting at `minute` and lasting `secs`.
fn run(
    registry: &mut Registry,
    job: &JobSpec,
    minute: i64,
    secs: i64,
    status: ExecutionStatus,
    stderr: &str,
) -> String {
    let id = registry.record_start(job, 1, Trigger::Scheduled, at(minute));
    if !stderr.is_empty() {
        registry.record_output(&id, Stream::Stderr, stderr);
    }
    let mut completion = Completion::new(status);
    completion.exit_code = Some(i32::from(status != ExecutionStatus::Succeeded));
    registry
        .record_completion(&id, completion, at(minute) + Duration::seconds(secs))
        .unwrap();
    id
}

#[test]
fn degrading_job_with_clustered_failures() {
    let mut registry = Registry::in_memory(RetentionPolicy::default());
    let sync = job("sync");

    for minute in 0..4 {
        run(&mut registry, &sync, minute, 10, ExecutionStatus::Succeeded, "");
    }
    run(&mut registry, &sync, 4, 10, ExecutionStatus::Failed, "open /var/data/a1.db: timeout after 30s\n");
    run(&mut registry, &sync, 5, 10, ExecutionStatus::Failed, "open /var/data/b2.db: timeout after 45s\n");
    run(&mut registry, &sync, 6, 10, ExecutionStatus::Failed, "connection refused\n");
    run(&mut registry, &sync, 7, 10, ExecutionStatus::Succeeded, "");

    let stats = registry.statistics(&sync.id);
    assert_eq!(stats.total, 8);
    assert_eq!(stats.succeeded, 5);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.trend, Trend::Degrading);
    assert_eq!(stats.avg_duration_ms, Some(10_000));
    assert_eq!(stats.last_started_at, Some(at(7)));

    let patterns: Vec<(&str, usize)> = stats
        .failure_clusters
        .iter()
        .map(|c| (c.pattern.as_str(), c.count))
        .collect();
    assert_eq!(
        patterns,
        vec![
            ("open <path>: timeout after <n>s", 2),
            ("connection refused", 1),
        ]
    );
    // The example is the most recent message of the cluster
    assert!(stats.failure_clusters[0].example.contains("b2.db"));
}

#[test]
fn few_runs_are_insufficient_for_a_trend() {
    let mut registry = Registry::in_memory(RetentionPolicy::default());
    let nightly = job("nightly");
    run(&mut registry, &nightly, 0, 5, ExecutionStatus::Failed, "boom\n");
    run(&mut registry, &nightly, 1, 5, ExecutionStatus::Succeeded, "");

    let stats = registry.statistics(&nightly.id);
    assert_eq!(stats.trend, Trend::InsufficientData);
    assert_eq!(stats.success_rate, 0.5);
}

#[test]
fn search_across_jobs() {
    let mut registry = Registry::in_memory(RetentionPolicy::default());
    let backup = job("backup");
    let report = job("report");
    run(&mut registry, &backup, 0, 1, ExecutionStatus::Succeeded, "");
    run(&mut registry, &backup, 1, 1, ExecutionStatus::Failed, "disk full\n");
    run(&mut registry, &report, 2, 1, ExecutionStatus::Failed, "Disk quota exceeded\n");
    run(&mut registry, &report, 3, 1, ExecutionStatus::Succeeded, "");

    let failed = registry.search(&SearchQuery::new().status(ExecutionStatus::Failed));
    assert_eq!(failed.len(), 2);
    // Newest first
    assert_eq!(failed[0].job_id, report.id);

    let disk = registry.search(&SearchQuery::new().text("DISK"));
    assert_eq!(disk.len(), 2);

    let by_name = registry.search(&SearchQuery::new().text("backup"));
    assert_eq!(by_name.len(), 2);

    let window = registry.search(&SearchQuery::new().since(at(1)).until(at(3)));
    let ids: Vec<&str> = window.iter().map(|r| r.job_id.as_str()).collect();
    assert_eq!(ids, vec![report.id.as_str(), backup.id.as_str()]);

    let limited = registry.search(&SearchQuery::new().limit(1));
    assert_eq!(limited.len(), 1);
}

#[test]
fn retention_caps_per_job_and_total() {
    let mut registry = Registry::in_memory(RetentionPolicy {
        max_per_job: 3,
        max_total: 5,
    });
    let a = job("a");
    let b = job("b");
    for minute in 0..5 {
        run(&mut registry, &a, minute, 1, ExecutionStatus::Succeeded, "");
    }
    assert_eq!(registry.history(&a.id, 100).len(), 3);

    for minute in 5..9 {
        run(&mut registry, &b, minute, 1, ExecutionStatus::Succeeded, "");
    }
    assert_eq!(registry.len(), 5);
    assert_eq!(registry.history(&b.id, 100).len(), 3);
    // The oldest finished records went first
    let kept_a = registry.history(&a.id, 100);
    assert_eq!(kept_a.len(), 2);
    assert_eq!(kept_a[0].started_at, at(4));
}

#[tokio::test]
async fn registry_manager_reads_saved_state() {
    let dir = TempDir::new().unwrap();
    let registry_path = dir.path().join("registry.json");
    let jobs_path = dir.path().join("jobs.json");

    let mut registry = Registry::open(&registry_path, RetentionPolicy::default())
        .await
        .unwrap();
    let etl = job("etl");
    let id = run(&mut registry, &etl, 0, 2, ExecutionStatus::Succeeded, "");
    registry.save().await.unwrap();

    let manager = RegistryManager::new(&jobs_path, &registry_path);
    assert!(manager.list().await.unwrap().is_empty());
    let history = manager.history(&etl.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, id);

    match manager.add(NewJob::new("x", "true")).await {
        Err(Error::Job(JobError::NotSupported(op))) => assert_eq!(op, "add"),
        other => panic!("unexpected {:?}", other.map(|j| j.id)),
    }
    match manager.get(&etl.id).await {
        Err(Error::Job(JobError::NotFound(_))) => {}
        other => panic!("unexpected {:?}", other.map(|j| j.id)),
    }
}
