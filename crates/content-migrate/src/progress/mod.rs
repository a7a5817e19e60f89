//! Job ledger: lifecycle, counters, throughput/ETA, logs and resume.
//!
//! Job state is kept in two tiers. Writes go to the durable [`JobStore`]
//! first and then to the in-process [`JobCache`]; reads try the cache and
//! fall back to the durable store.
//!
//! A job is `running` from creation until exactly one terminal status is
//! reached through [`JobStore::transition`].

mod backend;
mod cache;
mod db;
mod file;

pub use backend::{job_status_to_str, str_to_job_status, JobStore};
pub use cache::JobCache;
pub use db::PgJobStore;
pub use file::FileJobStore;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sysinfo::System;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ProgressConfig;
use crate::error::{MigrateError, Result};
use crate::orchestrator::RunOptions;

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(job_status_to_str(*self))
    }
}

/// Derived progress figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    /// processed / total * 100; 0 when total is 0.
    pub percentage: f64,
    /// Processed rows per second.
    pub throughput: f64,
    pub eta: Option<DateTime<Utc>>,
    pub elapsed_seconds: f64,
    pub peak_memory_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// One timestamped entry in a job's log lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub context: Value,
}

/// One run of the orchestration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJob {
    pub job_id: String,
    pub status: JobStatus,
    pub options: RunOptions,
    /// SHA-256 of the configuration the job started with.
    pub config_hash: String,

    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub current_batch: u64,
    pub total_batches: u64,
    /// Keyset cursor: highest source id handled so far.
    pub last_source_id: Option<i64>,

    pub stats: JobStats,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<LogEntry>,
    pub warnings: Vec<LogEntry>,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationJob {
    pub fn new(options: RunOptions, total: u64, config_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        let batch_size = options.batch.batch_size.max(1) as u64;
        Self {
            job_id: Uuid::new_v4().to_string(),
            status: JobStatus::Running,
            last_source_id: options.batch.after_id,
            options,
            config_hash: config_hash.into(),
            total,
            processed: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            current_batch: 0,
            total_batches: total.div_ceil(batch_size),
            stats: JobStats::default(),
            logs: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Recompute percentage, throughput, ETA and elapsed time as of `now`.
    pub fn refresh_stats(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.stats.elapsed_seconds = elapsed;

        self.stats.percentage = if self.total == 0 {
            0.0
        } else {
            (self.processed as f64 / self.total as f64 * 100.0).min(100.0)
        };

        self.stats.throughput = if elapsed > 0.0 {
            self.processed as f64 / elapsed
        } else {
            0.0
        };

        let remaining = self.total.saturating_sub(self.processed);
        self.stats.eta = if remaining > 0 && self.stats.throughput > 0.0 {
            let secs = remaining as f64 / self.stats.throughput;
            Some(now + chrono::Duration::milliseconds((secs * 1000.0) as i64))
        } else {
            None
        };
    }
}

/// Counter changes reported after a batch.
///
/// `failed` is normally left at zero: [`ProgressTracker::add_error`] counts
/// failures as it records them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDelta {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub current_batch: Option<u64>,
    pub last_source_id: Option<i64>,
}

/// A job together with its liveness flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(flatten)]
    pub job: MigrationJob,
    /// Running, but with no live snapshot and no durable update within the
    /// snapshot TTL. The process that owned it has probably died.
    pub possibly_orphaned: bool,
}

fn push_capped(list: &mut Vec<LogEntry>, entry: LogEntry, window: usize) {
    list.push(entry);
    if list.len() > window {
        let excess = list.len() - window;
        list.drain(..excess);
    }
}

/// Tracks job progress across the durable store and the snapshot cache.
pub struct ProgressTracker {
    store: Arc<dyn JobStore>,
    cache: JobCache,
    log_window: usize,
    system: Mutex<System>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn JobStore>, config: &ProgressConfig) -> Self {
        Self {
            store,
            cache: JobCache::new(Duration::from_secs(config.cache_ttl_secs)),
            log_window: config.log_window.max(1),
            system: Mutex::new(System::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Resident memory of this process in bytes.
    fn current_memory(&self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = self.system.lock().ok()?;
        system.refresh_process(pid);
        system.process(pid).map(|p| p.memory())
    }

    /// Durable first, then cache. A refused save means the job turned
    /// terminal elsewhere; the stale snapshot is dropped.
    async fn persist(&self, job: &MigrationJob) -> Result<bool> {
        let written = self.store.save(job).await?;
        if written {
            self.cache.put(job);
        } else {
            self.cache.remove(&job.job_id);
        }
        Ok(written)
    }

    /// Latest known state: live snapshot or durable record.
    pub async fn get_job(&self, job_id: &str) -> Result<MigrationJob> {
        if let Some(job) = self.cache.get(job_id) {
            return Ok(job);
        }
        self.load_durable(job_id).await
    }

    async fn load_durable(&self, job_id: &str) -> Result<MigrationJob> {
        self.store
            .load(job_id)
            .await?
            .ok_or_else(|| MigrateError::JobNotFound(job_id.to_string()))
    }

    /// Status as recorded in the durable store.
    pub async fn durable_status(&self, job_id: &str) -> Result<JobStatus> {
        Ok(self.load_durable(job_id).await?.status)
    }

    /// Create and persist a new running job.
    pub async fn start_job(
        &self,
        options: RunOptions,
        total: u64,
        config_hash: &str,
    ) -> Result<MigrationJob> {
        let job = MigrationJob::new(options, total, config_hash);
        self.persist(&job).await?;
        info!(
            "Started job {} ({} rows in {} batches, {} backend)",
            job.job_id,
            job.total,
            job.total_batches,
            self.store.backend_type()
        );
        Ok(job)
    }

    /// Merge counters and refresh derived stats.
    pub async fn update_progress(
        &self,
        job_id: &str,
        delta: &ProgressDelta,
    ) -> Result<MigrationJob> {
        let mut job = self.get_job(job_id).await?;
        job.processed += delta.processed;
        job.successful += delta.successful;
        job.failed += delta.failed;
        job.skipped += delta.skipped;
        if let Some(batch) = delta.current_batch {
            job.current_batch = batch;
        }
        if delta.last_source_id.is_some() {
            job.last_source_id = delta.last_source_id;
        }

        let now = Utc::now();
        job.refresh_stats(now);
        if let Some(memory) = self.current_memory() {
            job.stats.peak_memory_bytes = job.stats.peak_memory_bytes.max(memory);
        }
        job.updated_at = now;

        self.persist(&job).await?;
        Ok(job)
    }

    async fn append(
        &self,
        job_id: &str,
        level: LogLevel,
        message: &str,
        context: Value,
    ) -> Result<()> {
        let mut job = self.get_job(job_id).await?;
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            context,
        };
        match level {
            LogLevel::Info => push_capped(&mut job.logs, entry, self.log_window),
            LogLevel::Warning => push_capped(&mut job.warnings, entry, self.log_window),
            LogLevel::Error => {
                job.failed += 1;
                push_capped(&mut job.errors, entry, self.log_window);
            }
        }
        job.updated_at = Utc::now();
        self.persist(&job).await?;
        Ok(())
    }

    pub async fn add_log(&self, job_id: &str, message: &str, context: Value) -> Result<()> {
        info!(job_id, "{}", message);
        self.append(job_id, LogLevel::Info, message, context).await
    }

    pub async fn add_warning(&self, job_id: &str, message: &str, context: Value) -> Result<()> {
        warn!(job_id, "{}", message);
        self.append(job_id, LogLevel::Warning, message, context).await
    }

    /// Record an error and count it as a failed row.
    pub async fn add_error(&self, job_id: &str, message: &str, context: Value) -> Result<()> {
        error!(job_id, "{}", message);
        self.append(job_id, LogLevel::Error, message, context).await
    }

    /// Move a running job to a terminal status.
    ///
    /// Returns `false`, leaving the stored status untouched, if the job has
    /// already reached a terminal status.
    pub async fn complete_job(&self, job_id: &str, status: JobStatus) -> Result<bool> {
        if !status.is_terminal() {
            return Err(MigrateError::State(format!(
                "cannot complete job {} with status {}",
                job_id, status
            )));
        }

        let mut job = match self.cache.get(job_id) {
            Some(job) => job,
            None => self.load_durable(job_id).await?,
        };
        let now = Utc::now();
        job.status = status;
        job.completed_at = Some(now);
        job.updated_at = now;
        job.refresh_stats(now);
        job.stats.eta = None;

        let swapped = self.store.transition(&job).await?;
        if swapped {
            self.cache.put(&job);
            info!("Job {} finished: {}", job_id, status);
        } else {
            self.cache.remove(job_id);
            warn!("Job {} was already finished; {} ignored", job_id, status);
        }
        Ok(swapped)
    }

    /// Operator cancellation. Observed by the running loop between batches.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        self.complete_job(job_id, JobStatus::Cancelled).await
    }

    fn view(&self, job: MigrationJob, now: DateTime<Utc>) -> JobProgress {
        let ttl = chrono::Duration::from_std(self.cache.ttl())
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        let possibly_orphaned = job.status == JobStatus::Running
            && !self.cache.contains(&job.job_id)
            && now - job.updated_at > ttl;
        JobProgress {
            job,
            possibly_orphaned,
        }
    }

    pub async fn get_job_progress(&self, job_id: &str) -> Result<JobProgress> {
        let job = self.get_job(job_id).await?;
        Ok(self.view(job, Utc::now()))
    }

    /// Running jobs, each flagged when it looks orphaned.
    pub async fn get_active_jobs(&self) -> Result<Vec<JobProgress>> {
        let now = Utc::now();
        let jobs = self.store.list_by_status(JobStatus::Running).await?;
        Ok(jobs
            .into_iter()
            .map(|durable| {
                let job = self.cache.get(&durable.job_id).unwrap_or(durable);
                self.view(job, now)
            })
            .collect())
    }

    pub async fn get_job_history(&self, limit: usize) -> Result<Vec<MigrationJob>> {
        self.store.history(limit).await
    }

    /// Reopen a running job for another pass of the loop.
    ///
    /// The config hash must match unless `force` is set, in which case the
    /// job adopts the new hash.
    pub async fn resume_job(
        &self,
        job_id: &str,
        config_hash: &str,
        force: bool,
    ) -> Result<MigrationJob> {
        let mut job = self.load_durable(job_id).await?;
        if job.status != JobStatus::Running {
            return Err(MigrateError::InvalidTransition {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
            });
        }

        if job.config_hash != config_hash {
            if !force {
                return Err(MigrateError::ConfigChanged);
            }
            warn!("Config changed since job {} started; resuming anyway", job_id);
            job.config_hash = config_hash.to_string();
        }

        job.updated_at = Utc::now();
        self.persist(&job).await?;
        info!(
            "Resuming job {} after source id {:?} ({}/{} processed)",
            job_id, job.last_source_id, job.processed, job.total
        );
        Ok(job)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    pub(crate) fn sample_job(job_id: &str) -> MigrationJob {
        let mut job = MigrationJob::new(RunOptions::default(), 100, "abc123");
        job.job_id = job_id.to_string();
        job
    }

    fn tracker(dir: &TempDir, log_window: usize) -> ProgressTracker {
        let config = ProgressConfig {
            log_window,
            ..Default::default()
        };
        ProgressTracker::new(Arc::new(FileJobStore::new(dir.path())), &config)
    }

    #[test]
    fn test_progress_math() {
        let mut job = sample_job("job-1");
        let now = Utc::now();
        job.started_at = now - chrono::Duration::seconds(20);
        job.processed = 40;

        job.refresh_stats(now);
        assert_eq!(job.stats.percentage, 40.0);
        assert_eq!(job.stats.throughput, 2.0);
        assert_eq!(job.stats.elapsed_seconds, 20.0);
        assert_eq!(job.stats.eta, Some(now + chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_progress_math_with_zero_total() {
        let mut job = MigrationJob::new(RunOptions::default(), 0, "abc123");
        job.refresh_stats(Utc::now());
        assert_eq!(job.stats.percentage, 0.0);
        assert_eq!(job.stats.eta, None);
        assert_eq!(job.total_batches, 0);
    }

    #[test]
    fn test_total_batches_rounds_up() {
        let mut options = RunOptions::default();
        options.batch.batch_size = 10;
        let job = MigrationJob::new(options, 25, "abc123");
        assert_eq!(job.total_batches, 3);
    }

    #[tokio::test]
    async fn test_start_update_complete() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir, 100);

        let job = tracker
            .start_job(RunOptions::default(), 100, "abc123")
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);

        let updated = tracker
            .update_progress(
                &job.job_id,
                &ProgressDelta {
                    processed: 10,
                    successful: 9,
                    skipped: 1,
                    current_batch: Some(1),
                    last_source_id: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.processed, 10);
        assert_eq!(updated.last_source_id, Some(10));
        assert_eq!(updated.stats.percentage, 10.0);

        // Durable copy matches the snapshot
        let durable = tracker.store().load(&job.job_id).await.unwrap().unwrap();
        assert_eq!(durable.successful, 9);

        assert!(tracker
            .complete_job(&job.job_id, JobStatus::Completed)
            .await
            .unwrap());
        assert!(!tracker
            .complete_job(&job.job_id, JobStatus::Failed)
            .await
            .unwrap());
        assert_eq!(
            tracker.durable_status(&job.job_id).await.unwrap(),
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_logs_are_capped_and_errors_counted() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir, 3);
        let job = tracker
            .start_job(RunOptions::default(), 10, "abc123")
            .await
            .unwrap();

        for i in 0..5 {
            tracker
                .add_log(&job.job_id, &format!("batch {}", i), json!({"batch": i}))
                .await
                .unwrap();
        }
        tracker
            .add_error(&job.job_id, "row 7 failed", json!({"source_id": 7}))
            .await
            .unwrap();
        tracker
            .add_warning(&job.job_id, "row 8 has no content", Value::Null)
            .await
            .unwrap();

        let job = tracker.get_job(&job.job_id).await.unwrap();
        let messages: Vec<&str> = job.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["batch 2", "batch 3", "batch 4"]);
        assert_eq!(job.failed, 1);
        assert_eq!(job.errors[0].context["source_id"], json!(7));
        assert_eq!(job.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_freezes_status_against_stale_updates() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir, 100);
        let job = tracker
            .start_job(RunOptions::default(), 10, "abc123")
            .await
            .unwrap();

        // A second tracker, as another process would
        let operator = ProgressTracker::new(
            Arc::new(FileJobStore::new(dir.path())),
            &ProgressConfig::default(),
        );
        assert!(operator.cancel_job(&job.job_id).await.unwrap());

        tracker
            .update_progress(
                &job.job_id,
                &ProgressDelta {
                    processed: 5,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            tracker.durable_status(&job.job_id).await.unwrap(),
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_resume_rules() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir, 100);
        let mut options = RunOptions::default();
        options.batch.after_id = Some(40);
        let job = tracker.start_job(options, 10, "abc123").await.unwrap();

        let resumed = tracker.resume_job(&job.job_id, "abc123", false).await.unwrap();
        assert_eq!(resumed.last_source_id, Some(40));

        assert!(matches!(
            tracker.resume_job(&job.job_id, "changed", false).await,
            Err(MigrateError::ConfigChanged)
        ));
        let forced = tracker.resume_job(&job.job_id, "changed", true).await.unwrap();
        assert_eq!(forced.config_hash, "changed");

        tracker
            .complete_job(&job.job_id, JobStatus::Failed)
            .await
            .unwrap();
        assert!(matches!(
            tracker.resume_job(&job.job_id, "changed", false).await,
            Err(MigrateError::InvalidTransition { .. })
        ));
        assert!(matches!(
            tracker.resume_job("missing", "abc123", false).await,
            Err(MigrateError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_active_jobs_flag_orphans() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(FileJobStore::new(dir.path()));

        let mut stale = sample_job("stale");
        stale.updated_at = Utc::now() - chrono::Duration::hours(2);
        store.save(&stale).await.unwrap();

        let tracker = ProgressTracker::new(store, &ProgressConfig::default());
        let live = tracker
            .start_job(RunOptions::default(), 10, "abc123")
            .await
            .unwrap();

        let active = tracker.get_active_jobs().await.unwrap();
        assert_eq!(active.len(), 2);
        for entry in active {
            if entry.job.job_id == live.job_id {
                assert!(!entry.possibly_orphaned);
            } else {
                assert!(entry.possibly_orphaned);
            }
        }

        let history = tracker.get_job_history(10).await.unwrap();
        assert_eq!(history.len(), 2);
    }
}
