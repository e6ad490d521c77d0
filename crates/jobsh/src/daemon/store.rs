//! Persisted job table.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::jobs::JobSpec;

/// Replace `path` with `bytes` so readers see either the old or the new
/// content: write a sibling temp file, sync it, rename over.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JobsFile {
    #[serde(default)]
    jobs: Vec<JobSpec>,
}

/// `jobs.json`: every job spec the daemon owns.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all jobs. A missing file is an empty table; an unreadable one is
    /// an error, since starting with no jobs would drop them on next save.
    pub async fn load(&self) -> Result<Vec<JobSpec>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let file: JobsFile = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Internal(format!("corrupt job table {}: {}", self.path.display(), e))
        })?;
        Ok(file.jobs)
    }

    pub async fn save(&self, jobs: &[JobSpec]) -> Result<()> {
        let file = JobsFile {
            jobs: jobs.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| Error::Internal(format!("serialize job table: {}", e)))?;
        write_atomic(&self.path, &json).await?;
        tracing::trace!(path = %self.path.display(), jobs = jobs.len(), "job table saved");
        Ok(())
    }
}
