//! # content-migrate
//!
//! Resumable batch migration of legacy MySQL CMS articles into a structured
//! PostgreSQL content schema.
//!
//! This library provides:
//!
//! - **Pre-flight validation** of the legacy schema, data quality and indexes
//! - **Field transformation** with HTML cleanup, status mapping and per-field overrides
//! - **Keyset batching** that never migrates the same legacy row twice
//! - **Job tracking** with throughput/ETA, capped logs and resume after a crash
//! - **Resync** of active mappings from the legacy source
//!
//! ## Example
//!
//! ```rust,no_run
//! use content_migrate::{Config, Orchestrator, RunOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> content_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let mut options = RunOptions::default();
//!     options.batch = content_migrate::BatchOptions::from_config(&config);
//!
//!     let orchestrator = Orchestrator::from_config(config)?;
//!     let result = orchestrator.run(options, CancellationToken::new()).await?;
//!     println!("Migrated {} of {} rows", result.successful, result.total);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod legacy;
pub mod migrator;
pub mod orchestrator;
pub mod progress;
pub mod store;
pub mod transform;
pub mod validator;

// Re-exports for convenient access
pub use config::{Config, JobBackend, MigrationConfig, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use legacy::{ArticleFilters, LegacyConnector, LegacyRecord, MysqlConnector};
pub use migrator::{BatchOptions, BatchResult, Migrator, SyncSummary};
pub use orchestrator::{HealthCheckResult, MigrationResult, Orchestrator, ProgressUpdate, RunOptions};
pub use progress::{JobProgress, JobStatus, MigrationJob, ProgressTracker};
pub use store::{DestinationStore, PgStore};
pub use transform::Transformer;
pub use validator::{ValidationReport, Validator};
