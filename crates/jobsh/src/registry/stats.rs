//! Statistics derived from a job's executions.
//!
//! Nothing here is stored; every figure is computed from the records when
//! asked for.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::record::{ExecutionRecord, ExecutionStatus};

/// Fewer finished executions than this give [`Trend::InsufficientData`].
pub const MIN_TREND_SAMPLES: usize = 4;

/// Change in success rate that counts as a trend.
const RATE_THRESHOLD: f64 = 0.1;

/// Relative change in mean duration that counts as a trend.
const DURATION_THRESHOLD: f64 = 0.2;

/// Direction of a job's recent executions against its older ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
    InsufficientData,
}

/// Failures whose messages normalise to the same pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCluster {
    pub pattern: String,
    pub count: usize,
    /// Most recent message in the cluster, as written
    pub example: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub job_id: String,
    pub total: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub stopped: usize,
    /// Succeeded over finished, stopped executions excluded; 0 when none
    pub success_rate: f64,
    pub min_duration_ms: Option<u64>,
    pub avg_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub trend: Trend,
    pub failure_clusters: Vec<FailureCluster>,
    pub last_started_at: Option<DateTime<Utc>>,
}

/// Compute statistics over `records`, which may be in any order.
pub fn compute(job_id: &str, records: &[&ExecutionRecord]) -> JobStats {
    let mut finished: Vec<&ExecutionRecord> = records
        .iter()
        .copied()
        .filter(|r| r.status.is_finished() && r.status != ExecutionStatus::Stopped)
        .collect();
    finished.sort_by_key(|r| r.started_at);

    let count = |status: ExecutionStatus| records.iter().filter(|r| r.status == status).count();
    let succeeded = count(ExecutionStatus::Succeeded);
    let durations: Vec<u64> = finished.iter().filter_map(|r| r.duration_ms).collect();

    JobStats {
        job_id: job_id.to_string(),
        total: records.len(),
        running: count(ExecutionStatus::Running),
        succeeded,
        failed: records.iter().filter(|r| r.status.is_failure()).count(),
        stopped: count(ExecutionStatus::Stopped),
        success_rate: success_rate(&finished),
        min_duration_ms: durations.iter().min().copied(),
        avg_duration_ms: mean(&durations).map(|m| m.round() as u64),
        max_duration_ms: durations.iter().max().copied(),
        trend: trend(&finished),
        failure_clusters: cluster_failures(records),
        last_started_at: records.iter().map(|r| r.started_at).max(),
    }
}

fn success_rate(records: &[&ExecutionRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let ok = records
        .iter()
        .filter(|r| r.status == ExecutionStatus::Succeeded)
        .count();
    ok as f64 / records.len() as f64
}

fn mean(values: &[u64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<u64>() as f64 / values.len() as f64)
    }
}

/// Compare the newer half of `finished` (oldest first) with the older half.
///
/// Success rate decides first; when it moved less than the threshold, mean
/// duration does.
pub fn trend(finished: &[&ExecutionRecord]) -> Trend {
    if finished.len() < MIN_TREND_SAMPLES {
        return Trend::InsufficientData;
    }
    let (older, newer) = finished.split_at(finished.len() / 2);

    let delta = success_rate(newer) - success_rate(older);
    if delta >= RATE_THRESHOLD {
        return Trend::Improving;
    }
    if delta <= -RATE_THRESHOLD {
        return Trend::Degrading;
    }

    let durations = |half: &[&ExecutionRecord]| -> Vec<u64> {
        half.iter().filter_map(|r| r.duration_ms).collect()
    };
    match (mean(&durations(older)), mean(&durations(newer))) {
        (Some(before), Some(after)) if before > 0.0 => {
            let change = (after - before) / before;
            if change <= -DURATION_THRESHOLD {
                Trend::Improving
            } else if change >= DURATION_THRESHOLD {
                Trend::Degrading
            } else {
                Trend::Stable
            }
        }
        _ => Trend::Stable,
    }
}

static HEX_ID: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:0x[0-9a-fA-F]+|[0-9a-fA-F]*[0-9][0-9a-fA-F]*[a-fA-F][0-9a-fA-F]*|[0-9a-fA-F]*[a-fA-F][0-9a-fA-F]*[0-9][0-9a-fA-F]*)\b",
    )
    .ok()
});
static PATH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:~|\.{1,2})?/[^\s:'\x22]+").ok());
static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d+").ok());

/// Collapse the variable parts of a failure message: paths, hex ids and
/// numbers.
pub fn normalize_message(message: &str) -> String {
    let mut text = message.to_string();
    if let Some(re) = PATH.as_ref() {
        text = re.replace_all(&text, "<path>").into_owned();
    }
    if let Some(re) = HEX_ID.as_ref() {
        text = re
            .replace_all(&text, |caps: &regex::Captures<'_>| {
                let m = &caps[0];
                if m.len() >= 6 || m.starts_with("0x") {
                    "<id>".to_string()
                } else {
                    m.to_string()
                }
            })
            .into_owned();
    }
    if let Some(re) = NUMBER.as_ref() {
        text = re.replace_all(&text, "<n>").into_owned();
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Group failure messages by normalised pattern, most frequent first, then
/// most recent.
pub fn cluster_failures(records: &[&ExecutionRecord]) -> Vec<FailureCluster> {
    let mut clusters: HashMap<String, FailureCluster> = HashMap::new();
    for record in records {
        let Some(message) = record.failure_message() else {
            continue;
        };
        let pattern = normalize_message(&message);
        let cluster = clusters
            .entry(pattern.clone())
            .or_insert_with(|| FailureCluster {
                pattern,
                count: 0,
                example: message.clone(),
                last_seen: record.started_at,
            });
        cluster.count += 1;
        if record.started_at >= cluster.last_seen {
            cluster.last_seen = record.started_at;
            cluster.example = message;
        }
    }
    let mut clusters: Vec<FailureCluster> = clusters.into_values().collect();
    clusters.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(b.last_seen.cmp(&a.last_seen))
            .then(a.pattern.cmp(&b.pattern))
    });
    clusters
}
