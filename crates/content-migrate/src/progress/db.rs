//! Database-backed job storage.
//!
//! Jobs live in `<job_schema>.migration_jobs` as one JSONB document per job.
//! `status` is also kept in its own column so that the terminal transition
//! can be guarded with `WHERE status = 'running'`.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::info;

use super::backend::{job_status_to_str, JobStore};
use super::{JobStatus, MigrationJob};
use crate::error::{MigrateError, Result};
use crate::store::quote_ident;

/// PostgreSQL job store.
pub struct PgJobStore {
    pool: Pool,
    schema: String,
}

impl PgJobStore {
    pub fn new(pool: Pool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    fn table(&self) -> String {
        format!("{}.migration_jobs", quote_ident(&self.schema))
    }
}

fn job_from_row(row: &Row) -> Result<MigrationJob> {
    let document: serde_json::Value = row.get(0);
    Ok(serde_json::from_value(document)?)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get().await?;

        conn.execute(
            &format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema)),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    job_id TEXT PRIMARY KEY,
                    status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'completed_with_errors', 'failed', 'cancelled')),
                    config_hash TEXT NOT NULL,
                    document JSONB NOT NULL,
                    started_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    completed_at TIMESTAMPTZ
                )",
                self.table()
            ),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_migration_jobs_status
                    ON {}(status, started_at DESC)",
                self.table()
            ),
            &[],
        )
        .await?;

        info!("Job schema '{}' initialized", self.schema);
        Ok(())
    }

    async fn save(&self, job: &MigrationJob) -> Result<bool> {
        let conn = self.pool.get().await?;
        let document = serde_json::to_value(job)?;
        let written = conn
            .execute(
                &format!(
                    "INSERT INTO {t} (job_id, status, config_hash, document, started_at, updated_at, completed_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     ON CONFLICT (job_id) DO UPDATE SET
                        status = EXCLUDED.status,
                        document = EXCLUDED.document,
                        updated_at = EXCLUDED.updated_at,
                        completed_at = EXCLUDED.completed_at
                     WHERE {t}.status = 'running'",
                    t = self.table()
                ),
                &[
                    &job.job_id,
                    &job_status_to_str(job.status),
                    &job.config_hash,
                    &document,
                    &job.started_at,
                    &job.updated_at,
                    &job.completed_at,
                ],
            )
            .await?;
        Ok(written == 1)
    }

    async fn load(&self, job_id: &str) -> Result<Option<MigrationJob>> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                &format!("SELECT document FROM {} WHERE job_id = $1", self.table()),
                &[&job_id],
            )
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn transition(&self, job: &MigrationJob) -> Result<bool> {
        let conn = self.pool.get().await?;
        let document = serde_json::to_value(job)?;
        let completed_at = job.completed_at.unwrap_or_else(Utc::now);
        let swapped = conn
            .execute(
                &format!(
                    "UPDATE {} SET status = $2, document = $3, updated_at = NOW(), completed_at = $4
                     WHERE job_id = $1 AND status = 'running'",
                    self.table()
                ),
                &[
                    &job.job_id,
                    &job_status_to_str(job.status),
                    &document,
                    &completed_at,
                ],
            )
            .await?;

        if swapped == 1 {
            return Ok(true);
        }

        let exists = conn
            .query_opt(
                &format!("SELECT 1 FROM {} WHERE job_id = $1", self.table()),
                &[&job.job_id],
            )
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(MigrateError::JobNotFound(job.job_id.clone())),
        }
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<MigrationJob>> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT document FROM {} WHERE status = $1 ORDER BY started_at DESC",
                    self.table()
                ),
                &[&job_status_to_str(status)],
            )
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn history(&self, limit: usize) -> Result<Vec<MigrationJob>> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT document FROM {} ORDER BY started_at DESC LIMIT $1",
                    self.table()
                ),
                &[&(limit as i64)],
            )
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}
