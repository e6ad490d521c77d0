//! Job model shared by the daemon and its clients.
//!
//! A [`JobSpec`] describes a persistent unit of work: command, schedule,
//! retry policy and status. [`JobManager`] is the capability interface
//! clients program against; the daemon client implements all of it, while
//! [`RegistryManager`](crate::registry::RegistryManager) reads persisted state
//! and rejects mutations.

pub mod process;
pub mod schedule;
pub mod spec;

pub use schedule::{CronExpr, Schedule};
pub use spec::{JobSpec, JobStatus, NewJob, RetryPolicy};

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::ExecutionRecord;

/// Operations on a set of persistent jobs.
#[async_trait]
pub trait JobManager: Send + Sync {
    /// Create a job.
    async fn add(&self, job: NewJob) -> Result<JobSpec>;

    /// Start a job now without waiting for it.
    async fn start(&self, id: &str) -> Result<JobSpec>;

    /// Request a running job to stop.
    async fn stop(&self, id: &str) -> Result<JobSpec>;

    /// Delete a job.
    async fn remove(&self, id: &str) -> Result<JobSpec>;

    async fn get(&self, id: &str) -> Result<JobSpec>;

    async fn list(&self) -> Result<Vec<JobSpec>>;

    /// Executions of a job, newest first.
    async fn history(&self, id: &str, limit: usize) -> Result<Vec<ExecutionRecord>>;
}
