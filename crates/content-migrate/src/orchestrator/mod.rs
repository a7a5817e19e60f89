//! Migration orchestrator - batch loop coordinator.
//!
//! A run goes through:
//!
//! 1. Pre-flight connection test (hard stop on failure)
//! 2. Optional validation (errors stop the run unless forced)
//! 3. Job creation (skipped for dry runs)
//! 4. The batch loop, feeding the progress tracker after every batch
//! 5. A single terminal transition for the job

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, JobBackend};
use crate::error::{MigrateError, Result};
use crate::legacy::{ConnectionStatus, LegacyConnector, MysqlConnector};
use crate::migrator::{BatchOptions, Migrator, RowError, SyncSummary};
use crate::progress::{
    FileJobStore, JobStatus, JobStore, MigrationJob, PgJobStore, ProgressDelta, ProgressTracker,
};
use crate::store::{create_pool, DestinationStore, PgStore};
use crate::transform::Transformer;
use crate::validator::{ValidationReport, Validator};

/// Error samples kept in a [`MigrationResult`].
const MAX_ERROR_SAMPLES: usize = 20;

/// Options for one run, persisted on the job so that a resume repeats them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Batch settings. `after_id` is the starting cursor.
    pub batch: BatchOptions,
    /// Stop after this many rows.
    #[serde(default)]
    pub max_items: Option<u64>,
    /// Run the validator before touching any row.
    #[serde(default)]
    pub validate_first: bool,
    /// Continue despite validation errors.
    #[serde(default)]
    pub force: bool,
}

/// Progress update sent after every batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub job_id: Option<String>,
    pub batch: u64,
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub percentage: f64,
    pub throughput: f64,
    pub eta: Option<DateTime<Utc>>,
    pub last_source_id: Option<i64>,
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source: ConnectionStatus,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Job identifier; `None` for dry runs.
    pub job_id: Option<String>,

    /// Final status.
    pub status: JobStatus,

    pub dry_run: bool,

    /// Rows the run set out to process.
    pub total: u64,

    /// Rows handled by this run (and earlier passes of a resumed job).
    pub processed: u64,

    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub batches: u64,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Average throughput (rows/second).
    pub rows_per_second: f64,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// Keyset cursor at the end of the run.
    pub last_source_id: Option<i64>,

    /// First row errors encountered.
    pub error_samples: Vec<RowError>,

    /// Redirects that would be created for migrated rows.
    pub redirects: usize,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Counters accumulated by the batch loop.
#[derive(Debug, Default)]
struct LoopState {
    processed: u64,
    successful: u64,
    failed: u64,
    skipped: u64,
    batches: u64,
    cursor: Option<i64>,
    error_samples: Vec<RowError>,
    redirects: usize,
    cancelled: bool,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    connector: Arc<dyn LegacyConnector>,
    store: Arc<dyn DestinationStore>,
    tracker: Arc<ProgressTracker>,
    transformer: Transformer,
    progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl Orchestrator {
    /// Create an orchestrator from already built components.
    pub fn new(
        config: Config,
        connector: Arc<dyn LegacyConnector>,
        store: Arc<dyn DestinationStore>,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        let transformer = Transformer::new(config.transform.clone());
        Self {
            config,
            connector,
            store,
            tracker,
            transformer,
            progress_tx: None,
        }
    }

    /// Build the MySQL connector, the destination pool and the configured job store.
    ///
    /// Pools connect lazily; nothing touches the network here.
    pub fn from_config(config: Config) -> Result<Self> {
        let connector: Arc<dyn LegacyConnector> = Arc::new(MysqlConnector::new(&config.source));

        let pool = create_pool(&config.target)?;
        let store: Arc<dyn DestinationStore> =
            Arc::new(PgStore::new(pool.clone(), config.target.schema.clone()));

        let job_store: Arc<dyn JobStore> = match config.progress.backend {
            JobBackend::Database => {
                Arc::new(PgJobStore::new(pool, config.progress.job_schema.clone()))
            }
            JobBackend::File => Arc::new(FileJobStore::new(&config.progress.state_dir)),
        };
        let tracker = Arc::new(ProgressTracker::new(job_store, &config.progress));

        Ok(Self::new(config, connector, store, tracker))
    }

    /// Replace the transformer, e.g. to register custom field handlers.
    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformer = transformer;
        self
    }

    /// Set progress channel for updates.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.store),
            self.transformer.clone(),
            self.config.clone(),
        )
    }

    /// Send progress update if channel is configured.
    async fn send_progress(&self, update: ProgressUpdate) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(update).await;
        }
    }

    /// Create destination and job tables.
    pub async fn init_schema(&self) -> Result<()> {
        self.store.init_schema().await?;
        self.tracker.store().init_schema().await?;
        info!(
            "Initialized {} destination and {} job store",
            self.store.backend_type(),
            self.tracker.store().backend_type()
        );
        Ok(())
    }

    /// Test both sides.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let source = self.connector.test_connection().await;

        let start = Instant::now();
        let target = self.store.ping().await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        let target_error = target.err().map(|e| e.to_string());
        let target_connected = target_error.is_none();
        Ok(HealthCheckResult {
            healthy: source.is_success() && target_connected,
            source,
            target_connected,
            target_latency_ms,
            target_error,
        })
    }

    /// Run the full pre-flight validation.
    pub async fn validate(&self) -> ValidationReport {
        Validator::new(Arc::clone(&self.connector), self.config.clone())
            .validate_legacy_database()
            .await
    }

    /// Resync active mappings.
    pub async fn sync(&self, limit: usize) -> Result<SyncSummary> {
        self.migrator().sync_active_mappings(limit).await
    }

    async fn preflight(&self, options: &RunOptions) -> Result<()> {
        let status = self.connector.test_connection().await;
        if !status.is_success() {
            return Err(MigrateError::Connection(format!(
                "{}: {}",
                status.database, status.message
            )));
        }
        info!(
            "Connected to legacy database {} ({} tables, {}ms)",
            status.database, status.table_count, status.latency_ms
        );

        if options.validate_first {
            let report = self.validate().await;
            if report.has_errors() {
                if !options.force {
                    return Err(MigrateError::Validation(report.errors.join("; ")));
                }
                warn!(
                    "Validation reported {} errors; continuing because of --force",
                    report.errors.len()
                );
            }
        }
        Ok(())
    }

    /// Run a new migration.
    pub async fn run(
        &self,
        mut options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<MigrationResult> {
        self.preflight(&options).await?;

        let migrator = self.migrator();
        let remaining = migrator
            .count_remaining(&options.batch.filters, options.batch.after_id)
            .await?;
        let total = match options.max_items {
            Some(cap) => remaining.min(cap),
            None => remaining,
        };

        if options.batch.dry_run {
            info!("Dry run: {} rows would be processed", total);
            return self.execute(&migrator, None, options, total, cancel).await;
        }

        let job = self
            .tracker
            .start_job(options.clone(), total, &self.config.hash())
            .await?;
        options.batch.job_id = Some(job.job_id.clone());
        self.execute(&migrator, Some(job), options, total, cancel)
            .await
    }

    /// Continue a running job from its persisted cursor.
    pub async fn resume(
        &self,
        job_id: &str,
        force: bool,
        cancel: CancellationToken,
    ) -> Result<MigrationResult> {
        let job = self
            .tracker
            .resume_job(job_id, &self.config.hash(), force)
            .await?;

        let mut options = job.options.clone();
        options.force = options.force || force;
        // Validation already ran when the job started
        options.validate_first = false;
        self.preflight(&options).await?;

        options.batch.job_id = Some(job.job_id.clone());
        options.batch.after_id = job.last_source_id;
        let total = job.total;
        let migrator = self.migrator();
        self.execute(&migrator, Some(job), options, total, cancel)
            .await
    }

    async fn execute(
        &self,
        migrator: &Migrator,
        job: Option<MigrationJob>,
        options: RunOptions,
        total: u64,
        cancel: CancellationToken,
    ) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let job_id = job.as_ref().map(|j| j.job_id.clone());

        let mut state = LoopState {
            cursor: options.batch.after_id,
            ..Default::default()
        };
        if let Some(job) = &job {
            state.processed = job.processed;
            state.successful = job.successful;
            state.failed = job.failed;
            state.skipped = job.skipped;
            state.batches = job.current_batch;
        }

        let outcome = self
            .batch_loop(migrator, job_id.as_deref(), &options, total, &cancel, &mut state)
            .await;

        let status = match (&outcome, state.cancelled) {
            (Err(_), _) => JobStatus::Failed,
            (Ok(()), true) => JobStatus::Cancelled,
            (Ok(()), false) if state.failed == 0 => JobStatus::Completed,
            (Ok(()), false) => JobStatus::CompletedWithErrors,
        };

        let mut final_status = status;
        if let Some(job_id) = &job_id {
            if let Err(e) = &outcome {
                error!("Job {} failed: {}", job_id, e);
                if let Err(log_err) = self
                    .tracker
                    .add_log(job_id, &format!("Job failed: {}", e), json!({}))
                    .await
                {
                    warn!("Could not record failure of job {}: {}", job_id, log_err);
                }
            }
            match self.tracker.complete_job(job_id, status).await {
                // Cancelled by an operator in the meantime
                Ok(false) if outcome.is_ok() => {
                    final_status = self.tracker.durable_status(job_id).await?;
                }
                Ok(_) => {}
                Err(e) if outcome.is_ok() => return Err(e),
                Err(e) => warn!("Could not mark job {} as {}: {}", job_id, status, e),
            }
        }

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let rows_per_second = if duration > 0.0 {
            state.processed as f64 / duration
        } else {
            0.0
        };

        if let Err(e) = outcome {
            return Err(match &job_id {
                Some(job_id) => MigrateError::job(job_id.as_str(), e.to_string()),
                None => e,
            });
        }

        let result = MigrationResult {
            job_id,
            status: final_status,
            dry_run: options.batch.dry_run,
            total,
            processed: state.processed,
            successful: state.successful,
            failed: state.failed,
            skipped: state.skipped,
            batches: state.batches,
            duration_seconds: duration,
            rows_per_second,
            started_at,
            completed_at,
            last_source_id: state.cursor,
            error_samples: state.error_samples,
            redirects: state.redirects,
        };

        info!(
            "Migration {}: {}/{} rows ({} failed, {} skipped) in {:.1}s ({:.1} rows/s)",
            result.status,
            result.successful,
            result.total,
            result.failed,
            result.skipped,
            result.duration_seconds,
            result.rows_per_second
        );

        Ok(result)
    }

    async fn batch_loop(
        &self,
        migrator: &Migrator,
        job_id: Option<&str>,
        options: &RunOptions,
        total: u64,
        cancel: &CancellationToken,
        state: &mut LoopState,
    ) -> Result<()> {
        let mut batch_options = options.batch.clone();
        let batch_size = options.batch.batch_size.max(1);
        let delay = Duration::from_millis(self.config.migration.batch_delay_ms);

        loop {
            if cancel.is_cancelled() {
                info!("Cancellation requested, stopping after {} batches", state.batches);
                state.cancelled = true;
                return Ok(());
            }
            if let Some(job_id) = job_id {
                let status = self.tracker.durable_status(job_id).await?;
                if status.is_terminal() {
                    info!("Job {} is {}, stopping", job_id, status);
                    state.cancelled = true;
                    return Ok(());
                }
            }

            let allowance = options
                .max_items
                .map(|cap| cap.saturating_sub(state.processed));
            if allowance == Some(0) {
                return Ok(());
            }
            let size = match allowance {
                Some(left) => batch_size.min(left as usize),
                None => batch_size,
            };

            batch_options.batch_size = size;
            batch_options.after_id = state.cursor;
            let result = migrator.migrate_batch(&batch_options).await?;
            if result.stats.total == 0 {
                return Ok(());
            }

            state.batches += 1;
            state.processed += result.stats.total;
            state.successful += result.stats.success;
            state.failed += result.stats.errors;
            state.skipped += result.stats.skipped;
            state.redirects += result.redirects.len();
            if result.last_source_id.is_some() {
                state.cursor = result.last_source_id;
            }
            let room = MAX_ERROR_SAMPLES.saturating_sub(state.error_samples.len());
            state
                .error_samples
                .extend(result.stats.error_details.iter().take(room).cloned());

            debug!("Batch {}: {}", state.batches, result.message);

            let mut update = ProgressUpdate {
                job_id: job_id.map(str::to_string),
                batch: state.batches,
                total,
                processed: state.processed,
                successful: state.successful,
                failed: state.failed,
                skipped: state.skipped,
                percentage: if total == 0 {
                    0.0
                } else {
                    (state.processed as f64 / total as f64 * 100.0).min(100.0)
                },
                throughput: 0.0,
                eta: None,
                last_source_id: state.cursor,
            };

            if let Some(job_id) = job_id {
                let delta = ProgressDelta {
                    processed: result.stats.total,
                    successful: result.stats.success,
                    failed: 0,
                    skipped: result.stats.skipped,
                    current_batch: Some(state.batches),
                    last_source_id: state.cursor,
                };
                let job = self.tracker.update_progress(job_id, &delta).await?;
                update.percentage = job.stats.percentage;
                update.throughput = job.stats.throughput;
                update.eta = job.stats.eta;

                for row_error in &result.stats.error_details {
                    self.tracker
                        .add_error(
                            job_id,
                            &format!("Row {} failed: {}", row_error.source_id, row_error.message),
                            json!({"source_id": row_error.source_id, "batch": state.batches}),
                        )
                        .await?;
                }
                for warning in &result.warnings {
                    self.tracker
                        .add_warning(
                            job_id,
                            &format!("Row {}: {}", warning.source_id, warning.message),
                            json!({"source_id": warning.source_id, "batch": state.batches}),
                        )
                        .await?;
                }
                self.tracker
                    .add_log(
                        job_id,
                        &format!("Batch {}: {}", state.batches, result.message),
                        json!({"batch": state.batches, "last_source_id": state.cursor}),
                    )
                    .await?;
            }

            self.send_progress(update).await;

            if result.stats.total < size as u64 {
                return Ok(());
            }
            if let Some(cap) = options.max_items {
                if state.processed >= cap {
                    return Ok(());
                }
            }

            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LegacyColumns;
    use crate::legacy::{LegacyRecord, MemoryConnector};
    use crate::store::MemoryStore;
    use serde_json::Map;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
source:
  host: legacy-db
  database: legacy_cms
  user: reader
  password: secret
target:
  host: localhost
  database: cms
  user: cms
migration:
  batch_size: 10
  batch_delay_ms: 0
progress:
  backend: file
"#;

    fn row(id: i64, title: &str) -> LegacyRecord {
        let mut fields = Map::new();
        fields.insert("title".into(), json!(title));
        fields.insert("content".into(), json!("<p>Body</p>"));
        fields.insert("status".into(), json!("published"));
        fields.insert("created_at".into(), json!("2021-03-04 05:06:07"));
        LegacyRecord::new(id, fields)
    }

    struct Fixture {
        _dir: TempDir,
        connector: Arc<MemoryConnector>,
        store: Arc<MemoryStore>,
        orchestrator: Orchestrator,
    }

    fn fixture(rows: Vec<LegacyRecord>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = Config::from_yaml(CONFIG).unwrap();
        config.progress.state_dir = dir.path().to_string_lossy().into_owned();

        let connector = Arc::new(MemoryConnector::with_records(
            "articles",
            LegacyColumns::default(),
            rows,
        ));
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(ProgressTracker::new(
            Arc::new(FileJobStore::new(dir.path())),
            &config.progress,
        ));
        let orchestrator = Orchestrator::new(config, connector.clone(), store.clone(), tracker);
        Fixture {
            _dir: dir,
            connector,
            store,
            orchestrator,
        }
    }

    fn options(batch_size: usize) -> RunOptions {
        let mut options = RunOptions::default();
        options.batch.batch_size = batch_size;
        options
    }

    fn hello_rows() -> Vec<LegacyRecord> {
        vec![row(1, "Hello"), row(2, "Hello"), row(3, "")]
    }

    #[tokio::test]
    async fn test_dry_run_then_real_run() {
        let f = fixture(hello_rows());

        let mut dry = options(10);
        dry.batch.dry_run = true;
        let result = f
            .orchestrator
            .run(dry, CancellationToken::new())
            .await
            .unwrap();
        assert!(result.dry_run);
        assert!(result.job_id.is_none());
        assert_eq!(result.total, 3);
        assert_eq!(result.successful, 3);
        assert!(f.store.mappings().is_empty());
        assert!(f
            .orchestrator
            .tracker()
            .get_job_history(10)
            .await
            .unwrap()
            .is_empty());

        let result = f
            .orchestrator
            .run(options(10), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.successful, 3);
        assert_eq!(result.batches, 1);

        let mut slugs: Vec<String> = f.store.contents().into_iter().map(|c| c.slug).collect();
        slugs.sort();
        assert_eq!(slugs, vec!["article-3", "hello", "hello-1"]);
        assert_eq!(f.store.mappings().len(), 3);

        let job_id = result.job_id.unwrap();
        let job = f.orchestrator.tracker().get_job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed, 3);
        assert_eq!(job.last_source_id, Some(3));
        assert!(job.completed_at.is_some());
        assert_eq!(job.stats.percentage, 100.0);
    }

    #[tokio::test]
    async fn test_max_items_caps_the_run() {
        let f = fixture((1..=7).map(|id| row(id, &format!("Post {}", id))).collect());
        let mut opts = options(3);
        opts.max_items = Some(5);

        let result = f
            .orchestrator
            .run(opts, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.total, 5);
        assert_eq!(result.processed, 5);
        assert_eq!(result.batches, 2);
        assert_eq!(f.store.mappings().len(), 5);
    }

    #[tokio::test]
    async fn test_progress_updates_are_sent() {
        let f = fixture((1..=5).map(|id| row(id, &format!("Post {}", id))).collect());
        let (tx, mut rx) = mpsc::channel(16);
        let orchestrator = f.orchestrator.with_progress(tx);

        orchestrator
            .run(options(2), CancellationToken::new())
            .await
            .unwrap();
        drop(orchestrator);

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[2].processed, 5);
        assert_eq!(updates[2].percentage, 100.0);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_batch() {
        let f = fixture(hello_rows());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = f.orchestrator.run(options(10), cancel).await.unwrap();
        assert_eq!(result.status, JobStatus::Cancelled);
        assert_eq!(result.processed, 0);
        assert!(f.store.mappings().is_empty());

        let job_id = result.job_id.unwrap();
        assert_eq!(
            f.orchestrator
                .tracker()
                .durable_status(&job_id)
                .await
                .unwrap(),
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_unreachable_source_is_a_hard_stop() {
        let f = fixture(hello_rows());
        f.connector.set_reachable(false);

        let err = f
            .orchestrator
            .run(options(10), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Connection(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(f
            .orchestrator
            .tracker()
            .get_job_history(10)
            .await
            .unwrap()
            .is_empty());
    }

    /// File-backed job store whose reads and terminal transitions fail.
    struct UnreadableJobStore(FileJobStore);

    #[async_trait::async_trait]
    impl JobStore for UnreadableJobStore {
        async fn init_schema(&self) -> Result<()> {
            self.0.init_schema().await
        }

        async fn save(&self, job: &MigrationJob) -> Result<bool> {
            self.0.save(job).await
        }

        async fn load(&self, _job_id: &str) -> Result<Option<MigrationJob>> {
            Err(MigrateError::State("job record unreadable".into()))
        }

        async fn transition(&self, _job: &MigrationJob) -> Result<bool> {
            Err(MigrateError::State("transition rejected".into()))
        }

        async fn list_by_status(&self, status: JobStatus) -> Result<Vec<MigrationJob>> {
            self.0.list_by_status(status).await
        }

        async fn history(&self, limit: usize) -> Result<Vec<MigrationJob>> {
            self.0.history(limit).await
        }

        fn backend_type(&self) -> &'static str {
            "unreadable"
        }
    }

    #[tokio::test]
    async fn test_failed_job_reports_loop_error_not_completion_error() {
        let dir = TempDir::new().unwrap();
        let config = Config::from_yaml(CONFIG).unwrap();
        let tracker = Arc::new(ProgressTracker::new(
            Arc::new(UnreadableJobStore(FileJobStore::new(dir.path()))),
            &config.progress,
        ));
        let connector = Arc::new(MemoryConnector::with_records(
            "articles",
            LegacyColumns::default(),
            hello_rows(),
        ));
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(config, connector, store.clone(), tracker.clone());

        let err = orchestrator
            .run(options(10), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Job { .. }));
        assert_eq!(err.exit_code(), 4);
        let message = err.to_string();
        assert!(message.contains("job record unreadable"), "{}", message);
        assert!(!message.contains("transition rejected"), "{}", message);
        assert!(store.mappings().is_empty());

        let history = tracker.get_job_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(message.contains(&history[0].job_id));
        assert!(history[0]
            .logs
            .iter()
            .any(|entry| entry.message.starts_with("Job failed")));
    }

    #[tokio::test]
    async fn test_validation_errors_block_unless_forced() {
        let f = fixture(hello_rows());
        // Every sampled row lacks content
        for id in 1..=3 {
            let mut r = row(id, "Title");
            r.fields.insert("content".into(), json!(""));
            f.connector.insert(r);
        }

        let mut opts = options(10);
        opts.validate_first = true;
        let err = f
            .orchestrator
            .run(opts.clone(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Validation(_)));
        assert!(f.store.mappings().is_empty());

        opts.force = true;
        let result = f
            .orchestrator
            .run(opts, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.successful, 3);
    }

    #[tokio::test]
    async fn test_resume_continues_from_cursor() {
        let f = fixture((1..=4).map(|id| row(id, &format!("Post {}", id))).collect());
        let tracker = f.orchestrator.tracker();

        // A job that handled rows 1-2 before its process died
        let mut opts = options(10);
        opts.batch.after_id = Some(2);
        let job = tracker
            .start_job(opts, 4, &f.orchestrator.config().hash())
            .await
            .unwrap();

        let result = f
            .orchestrator
            .resume(&job.job_id, false, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.job_id.as_deref(), Some(job.job_id.as_str()));
        let mut ids: Vec<i64> = f.store.mappings().iter().map(|m| m.source_id).collect();
        ids.sort();
        assert_eq!(ids, vec![3, 4]);

        let err = f
            .orchestrator
            .resume(&job.job_id, false, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_health_check_and_sync() {
        let f = fixture(hello_rows());
        let health = f.orchestrator.health_check().await.unwrap();
        assert!(health.healthy);
        assert!(health.source.is_success());

        f.orchestrator
            .run(options(10), CancellationToken::new())
            .await
            .unwrap();
        let summary = f.orchestrator.sync(10).await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.updated, 3);

        f.connector.set_reachable(false);
        let health = f.orchestrator.health_check().await.unwrap();
        assert!(!health.healthy);
    }
}
