//! Durable job storage trait.
//!
//! Implementations:
//!
//! - **PostgreSQL**: [`PgJobStore`](super::PgJobStore), one JSONB document per job
//! - **File**: [`FileJobStore`](super::FileJobStore), one signed JSON file per job
//!
//! The tracker works with `Arc<dyn JobStore>` and never assumes a backend.

use async_trait::async_trait;

use super::{JobStatus, MigrationJob};
use crate::error::{MigrateError, Result};

/// Trait for job persistence backends.
///
/// # Status guard
///
/// Once a job has reached a terminal status it is frozen: [`save`](Self::save)
/// becomes a no-op for it and [`transition`](Self::transition) fails. This is
/// what makes the terminal transition a compare-and-swap.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create tables or directories. Idempotent.
    async fn init_schema(&self) -> Result<()>;

    /// Insert or update a job while it is running.
    ///
    /// Returns `false` if the stored job is already terminal and nothing was written.
    async fn save(&self, job: &MigrationJob) -> Result<bool>;

    async fn load(&self, job_id: &str) -> Result<Option<MigrationJob>>;

    /// Write `job` (carrying its new terminal status) only if the stored
    /// status is still `running`. Returns whether the swap happened.
    async fn transition(&self, job: &MigrationJob) -> Result<bool>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<MigrationJob>>;

    /// Most recently started jobs first.
    async fn history(&self, limit: usize) -> Result<Vec<MigrationJob>>;

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}

/// Helper function to convert JobStatus to string representation.
pub fn job_status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::CompletedWithErrors => "completed_with_errors",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

/// Helper function to parse JobStatus from string.
pub fn str_to_job_status(s: &str) -> Result<JobStatus> {
    match s {
        "running" => Ok(JobStatus::Running),
        "completed" => Ok(JobStatus::Completed),
        "completed_with_errors" => Ok(JobStatus::CompletedWithErrors),
        "failed" => Ok(JobStatus::Failed),
        "cancelled" => Ok(JobStatus::Cancelled),
        _ => Err(MigrateError::State(format!("Invalid job status: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_roundtrip() {
        let statuses = [
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::CompletedWithErrors,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ];

        for status in statuses {
            let s = job_status_to_str(status);
            let parsed = str_to_job_status(s).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_invalid_job_status() {
        assert!(str_to_job_status("paused").is_err());
    }
}
