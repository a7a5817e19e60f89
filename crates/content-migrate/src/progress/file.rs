//! File-based job storage.
//!
//! One pretty-printed JSON file per job in the state directory, signed with
//! HMAC-SHA256 keyed by the job's config hash and written atomically through
//! a temp file + rename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::warn;

use super::backend::JobStore;
use super::{JobStatus, MigrationJob};
use crate::error::{MigrateError, Result};

type HmacSha256 = Hmac<Sha256>;

/// On-disk envelope.
#[derive(Debug, Serialize, Deserialize)]
struct SignedJob {
    job: MigrationJob,
    hmac: String,
}

fn compute_hmac(job: &MigrationJob) -> Result<String> {
    let content = serde_json::to_string(job)
        .map_err(|e| MigrateError::State(format!("Failed to serialize job for HMAC: {}", e)))?;

    let mut mac = HmacSha256::new_from_slice(job.config_hash.as_bytes())
        .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;

    mac.update(content.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Job ids become file names; anything but `[A-Za-z0-9_-]` is rejected.
fn is_safe_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Job store writing signed JSON files.
pub struct FileJobStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: &str) -> Result<PathBuf> {
        if !is_safe_id(job_id) {
            return Err(MigrateError::JobNotFound(job_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", job_id)))
    }

    fn read(&self, path: &Path) -> Result<MigrationJob> {
        let content = std::fs::read_to_string(path)?;
        let signed: SignedJob = serde_json::from_str(&content)?;

        let expected = compute_hmac(&signed.job)?;
        if signed.hmac != expected {
            return Err(MigrateError::State(format!(
                "Job file {} failed integrity check: HMAC mismatch (possible tampering)",
                path.display()
            )));
        }
        Ok(signed.job)
    }

    fn read_opt(&self, job_id: &str) -> Result<Option<MigrationJob>> {
        let path = self.path_for(job_id)?;
        if !path.exists() {
            return Ok(None);
        }
        self.read(&path).map(Some)
    }

    fn write(&self, job: &MigrationJob) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&job.job_id)?;

        let signed = SignedJob {
            hmac: compute_hmac(job)?,
            job: job.clone(),
        };
        let content = serde_json::to_string_pretty(&signed)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<MigrationJob>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping unreadable job file {}: {}", path.display(), e),
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn init_schema(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    async fn save(&self, job: &MigrationJob) -> Result<bool> {
        let _guard = self.lock.lock().await;
        if let Some(stored) = self.read_opt(&job.job_id)? {
            if stored.status.is_terminal() {
                return Ok(false);
            }
        }
        self.write(job)?;
        Ok(true)
    }

    async fn load(&self, job_id: &str) -> Result<Option<MigrationJob>> {
        let _guard = self.lock.lock().await;
        self.read_opt(job_id)
    }

    async fn transition(&self, job: &MigrationJob) -> Result<bool> {
        let _guard = self.lock.lock().await;
        match self.read_opt(&job.job_id)? {
            Some(stored) if stored.status == JobStatus::Running => {
                self.write(job)?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(MigrateError::JobNotFound(job.job_id.clone())),
        }
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<MigrationJob>> {
        let _guard = self.lock.lock().await;
        let mut jobs: Vec<MigrationJob> = self
            .read_all()?
            .into_iter()
            .filter(|j| j.status == status)
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }

    async fn history(&self, limit: usize) -> Result<Vec<MigrationJob>> {
        let _guard = self.lock.lock().await;
        let mut jobs = self.read_all()?;
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::tests::sample_job;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let store = FileJobStore::new(dir.path());
        let job = sample_job("job-1");

        assert!(store.save(&job).await.unwrap());
        let loaded = store.load("job-1").await.unwrap().unwrap();
        assert_eq!(loaded.job_id, "job-1");
        assert_eq!(loaded.config_hash, job.config_hash);
        assert!(store.load("job-2").await.unwrap().is_none());

        // Pretty JSON with the signature alongside the job
        let content = std::fs::read_to_string(dir.path().join("job-1.json")).unwrap();
        assert!(content.contains('\n'));
        assert!(content.contains("\"hmac\""));
    }

    #[tokio::test]
    async fn test_tampered_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileJobStore::new(dir.path());
        store.save(&sample_job("job-1")).await.unwrap();

        let path = dir.path().join("job-1.json");
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("\"total\": 100", "\"total\": 5")).unwrap();

        let err = store.load("job-1").await.unwrap_err();
        assert!(err.to_string().contains("HMAC mismatch"));
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_swap() {
        let dir = TempDir::new().unwrap();
        let store = FileJobStore::new(dir.path());
        let mut job = sample_job("job-1");
        store.save(&job).await.unwrap();

        job.status = JobStatus::Completed;
        assert!(store.transition(&job).await.unwrap());

        job.status = JobStatus::Failed;
        assert!(!store.transition(&job).await.unwrap());

        // Terminal jobs are frozen for plain saves too
        job.status = JobStatus::Running;
        assert!(!store.save(&job).await.unwrap());
        let stored = store.load("job-1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_list_and_history() {
        let dir = TempDir::new().unwrap();
        let store = FileJobStore::new(dir.path());
        let mut first = sample_job("job-1");
        first.started_at -= chrono::Duration::seconds(10);
        store.save(&first).await.unwrap();
        store.save(&sample_job("job-2")).await.unwrap();

        let mut done = sample_job("job-2");
        done.status = JobStatus::Cancelled;
        store.transition(&done).await.unwrap();

        let running = store.list_by_status(JobStatus::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].job_id, "job-1");

        let history = store.history(10).await.unwrap();
        let ids: Vec<&str> = history.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["job-2", "job-1"]);
        assert_eq!(store.history(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsafe_job_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileJobStore::new(dir.path());
        assert!(matches!(
            store.load("../etc/passwd").await,
            Err(MigrateError::JobNotFound(_))
        ));
    }
}
