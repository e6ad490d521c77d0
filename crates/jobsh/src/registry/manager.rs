//! Read-only job manager over the daemon's state files.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{ExecutionRecord, Registry, RetentionPolicy};
use crate::daemon::store::JobStore;
use crate::error::{JobError, Result};
use crate::jobs::{JobManager, JobSpec, NewJob};

/// Serves job and history reads straight from `jobs.json` and
/// `registry.json`, without a running daemon. Mutations are rejected with
/// [`JobError::NotSupported`].
///
/// Files are read on every call, so results reflect the daemon's last save.
pub struct RegistryManager {
    store: JobStore,
    registry_path: PathBuf,
}

impl RegistryManager {
    pub fn new(jobs_path: impl Into<PathBuf>, registry_path: impl Into<PathBuf>) -> Self {
        Self {
            store: JobStore::new(jobs_path),
            registry_path: registry_path.into(),
        }
    }

    /// Load the registry file as of now.
    pub async fn registry(&self) -> Result<Registry> {
        Registry::open(&self.registry_path, RetentionPolicy::unlimited()).await
    }
}

#[async_trait]
impl JobManager for RegistryManager {
    async fn add(&self, _job: NewJob) -> Result<JobSpec> {
        Err(JobError::NotSupported("add").into())
    }

    async fn start(&self, _id: &str) -> Result<JobSpec> {
        Err(JobError::NotSupported("start").into())
    }

    async fn stop(&self, _id: &str) -> Result<JobSpec> {
        Err(JobError::NotSupported("stop").into())
    }

    async fn remove(&self, _id: &str) -> Result<JobSpec> {
        Err(JobError::NotSupported("remove").into())
    }

    async fn get(&self, id: &str) -> Result<JobSpec> {
        self.store
            .load()
            .await?
            .into_iter()
            .find(|job| job.id == id)
            .ok_or_else(|| JobError::NotFound(id.to_string()).into())
    }

    async fn list(&self) -> Result<Vec<JobSpec>> {
        self.store.load().await
    }

    async fn history(&self, id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        Ok(self.registry().await?.history(id, limit))
    }
}
