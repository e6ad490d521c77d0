//! Bounds on how much history is kept.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::record::ExecutionRecord;

/// Limits applied after each completed execution. Running records are
/// never evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionPolicy {
    /// Finished records kept per job
    pub max_per_job: usize,
    /// Finished records kept overall
    pub max_total: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_per_job: 100,
            max_total: 10_000,
        }
    }
}

impl RetentionPolicy {
    pub fn unlimited() -> Self {
        Self {
            max_per_job: usize::MAX,
            max_total: usize::MAX,
        }
    }

    /// Drop the oldest finished records over either limit.
    ///
    /// `records` is in start order, oldest first. Returns how many were
    /// removed.
    pub fn apply(&self, records: &mut Vec<ExecutionRecord>) -> usize {
        let mut per_job: HashMap<&str, usize> = HashMap::new();
        for record in records.iter().filter(|r| !r.is_running()) {
            *per_job.entry(record.job_id.as_str()).or_default() += 1;
        }
        let finished: usize = per_job.values().sum();

        let mut excess_per_job: HashMap<String, usize> = per_job
            .into_iter()
            .filter(|(_, count)| *count > self.max_per_job)
            .map(|(job, count)| (job.to_string(), count - self.max_per_job))
            .collect();
        let per_job_evictions: usize = excess_per_job.values().sum();
        let mut excess_total = (finished - per_job_evictions).saturating_sub(self.max_total);

        let before = records.len();
        records.retain(|record| {
            if record.is_running() {
                return true;
            }
            if let Some(excess) = excess_per_job.get_mut(&record.job_id)
                && *excess > 0
            {
                *excess -= 1;
                return false;
            }
            if excess_total > 0 {
                excess_total -= 1;
                return false;
            }
            true
        });
        before - records.len()
    }
}
