//! PostgreSQL destination store.
//!
//! Content, mappings, overrides and claims live in the configured target
//! schema. Uniqueness is enforced by the database:
//! - `content_items.slug` is unique
//! - a partial unique index allows one active mapping per source row

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{GenericClient, Manager, ManagerConfig, Pool, RecyclingMethod};
use serde_json::{Map, Value};
use tokio_postgres::{Config as PgConfig, NoTls, Row};
use tracing::info;
use uuid::Uuid;

use super::{
    mapping_type_to_str, str_to_mapping_type, str_to_sync_direction, str_to_sync_frequency,
    sync_direction_to_str, sync_frequency_to_str, ContentRecord, ContentStore, DestinationStore,
    FieldOverride, MappingSpec, MappingStore, MigrationMapping, NewContent, OverrideValue,
};
use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};

const CONTENT_COLUMNS: &str = "id, content_type, title, slug, body, excerpt, status, published_at, \
     meta_title, meta_description, fields, metadata, created_at, updated_at";

const MAPPING_COLUMNS: &str = "id, source_table, source_id, content_id, mapping_type, \
     sync_direction, sync_frequency, is_active, created_at, last_sync_at, sync_error";

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Build a deadpool pool for the destination database.
pub fn create_pool(config: &TargetConfig) -> Result<Pool> {
    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    pg_config.password(&config.password);
    pg_config.connect_timeout(Duration::from_secs(30));

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    Pool::builder(mgr)
        .max_size(config.max_connections)
        .build()
        .map_err(|e| MigrateError::pool(e, "creating destination pool"))
}

/// Destination store backed by PostgreSQL.
pub struct PgStore {
    pool: Pool,
    schema: String,
}

impl PgStore {
    pub fn new(pool: Pool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    /// Create a pool from configuration and verify it with `SELECT 1`.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let pool = create_pool(config)?;
        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to destination PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(Self::new(pool, config.schema.clone()))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), name)
    }

    async fn insert_content<C: GenericClient>(
        &self,
        client: &C,
        content: &NewContent,
    ) -> Result<ContentRecord> {
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO {} (id, content_type, title, slug, body, excerpt, status, published_at,
                        meta_title, meta_description, fields, metadata, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW())
                     RETURNING {}",
                    self.table("content_items"),
                    CONTENT_COLUMNS
                ),
                &[
                    &Uuid::new_v4(),
                    &content.content_type,
                    &content.title,
                    &content.slug,
                    &content.body,
                    &content.excerpt,
                    &content.status,
                    &content.published_at,
                    &content.meta_title,
                    &content.meta_description,
                    &Value::Object(content.fields.clone()),
                    &content.metadata,
                ],
            )
            .await?;
        content_from_row(&row)
    }

    async fn insert_mapping<C: GenericClient>(
        &self,
        client: &C,
        content_id: Uuid,
        spec: &MappingSpec,
        overrides: &[FieldOverride],
    ) -> Result<MigrationMapping> {
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO {} (id, source_table, source_id, content_id, mapping_type,
                        sync_direction, sync_frequency, is_active, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, NOW())
                     RETURNING {}",
                    self.table("migration_mappings"),
                    MAPPING_COLUMNS
                ),
                &[
                    &Uuid::new_v4(),
                    &spec.source_table,
                    &spec.source_id,
                    &content_id,
                    &mapping_type_to_str(spec.mapping_type),
                    &sync_direction_to_str(spec.sync_direction),
                    &sync_frequency_to_str(spec.sync_frequency),
                ],
            )
            .await?;

        let mut mapping = mapping_from_row(&row)?;
        for (position, field_override) in overrides.iter().enumerate() {
            client
                .execute(
                    &format!(
                        "INSERT INTO {} (mapping_id, position, field, value_type, value)
                         VALUES ($1, $2, $3, $4, $5)
                         ON CONFLICT (mapping_id, field) DO UPDATE SET
                            position = EXCLUDED.position,
                            value_type = EXCLUDED.value_type,
                            value = EXCLUDED.value",
                        self.table("mapping_field_overrides")
                    ),
                    &[
                        &mapping.id,
                        &(position as i32),
                        &field_override.field,
                        &field_override.value.type_name(),
                        &field_override.value.to_json(),
                    ],
                )
                .await?;
        }
        mapping.overrides = overrides.to_vec();
        Ok(mapping)
    }

    async fn load_overrides<C: GenericClient>(
        &self,
        client: &C,
        mapping_id: Uuid,
    ) -> Result<Vec<FieldOverride>> {
        let rows = client
            .query(
                &format!(
                    "SELECT field, value_type, value FROM {} WHERE mapping_id = $1 ORDER BY position",
                    self.table("mapping_field_overrides")
                ),
                &[&mapping_id],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let field: String = row.get(0);
                let value_type: String = row.get(1);
                let raw: Value = row.get(2);
                Ok(FieldOverride {
                    field,
                    value: OverrideValue::from_raw(&value_type, &raw)?,
                })
            })
            .collect()
    }

    async fn with_overrides(&self, rows: Vec<Row>) -> Result<Vec<MigrationMapping>> {
        let client = self.pool.get().await?;
        let mut mappings = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut mapping = mapping_from_row(row)?;
            mapping.overrides = self.load_overrides(&client, mapping.id).await?;
            mappings.push(mapping);
        }
        Ok(mappings)
    }
}

fn content_from_row(row: &Row) -> Result<ContentRecord> {
    let fields = match row.get::<_, Value>(10) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(ContentRecord {
        id: row.get(0),
        content_type: row.get(1),
        title: row.get(2),
        slug: row.get(3),
        body: row.get(4),
        excerpt: row.get(5),
        status: row.get(6),
        published_at: row.get(7),
        meta_title: row.get(8),
        meta_description: row.get(9),
        fields,
        metadata: row.get(11),
        created_at: row.get(12),
        updated_at: row.get(13),
    })
}

fn mapping_from_row(row: &Row) -> Result<MigrationMapping> {
    let mapping_type: String = row.get(4);
    let sync_direction: String = row.get(5);
    let sync_frequency: String = row.get(6);
    Ok(MigrationMapping {
        id: row.get(0),
        source_table: row.get(1),
        source_id: row.get(2),
        content_id: row.get(3),
        mapping_type: str_to_mapping_type(&mapping_type)?,
        sync_direction: str_to_sync_direction(&sync_direction)?,
        sync_frequency: str_to_sync_frequency(&sync_frequency)?,
        is_active: row.get(7),
        created_at: row.get(8),
        last_sync_at: row.get(9),
        sync_error: row.get(10),
        overrides: Vec::new(),
    })
}

#[async_trait]
impl ContentStore for PgStore {
    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "SELECT EXISTS (SELECT 1 FROM {} WHERE slug = $1)",
                    self.table("content_items")
                ),
                &[&slug],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn create_content(&self, content: &NewContent) -> Result<ContentRecord> {
        let client = self.pool.get().await?;
        self.insert_content(&client, content).await
    }

    async fn update_content(&self, id: Uuid, content: &NewContent) -> Result<ContentRecord> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE {} SET content_type = $2, title = $3, body = $4, excerpt = $5,
                        status = $6, published_at = $7, meta_title = $8, meta_description = $9,
                        fields = $10, metadata = $11, updated_at = NOW()
                     WHERE id = $1
                     RETURNING {}",
                    self.table("content_items"),
                    CONTENT_COLUMNS
                ),
                &[
                    &id,
                    &content.content_type,
                    &content.title,
                    &content.body,
                    &content.excerpt,
                    &content.status,
                    &content.published_at,
                    &content.meta_title,
                    &content.meta_description,
                    &Value::Object(content.fields.clone()),
                    &content.metadata,
                ],
            )
            .await?;

        match row {
            Some(row) => content_from_row(&row),
            None => Err(MigrateError::Store(format!("content {} not found", id))),
        }
    }

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentRecord>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM {} WHERE id = $1",
                    CONTENT_COLUMNS,
                    self.table("content_items")
                ),
                &[&id],
            )
            .await?;
        row.as_ref().map(content_from_row).transpose()
    }

    async fn delete_content(&self, id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                &format!("DELETE FROM {} WHERE id = $1", self.table("content_items")),
                &[&id],
            )
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl MappingStore for PgStore {
    async fn active_source_ids(&self, source_table: &str) -> Result<HashSet<i64>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT source_id FROM {} WHERE source_table = $1 AND is_active",
                    self.table("migration_mappings")
                ),
                &[&source_table],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get::<_, i64>(0)).collect())
    }

    async fn create_mapping(
        &self,
        content_id: Uuid,
        spec: &MappingSpec,
        overrides: &[FieldOverride],
    ) -> Result<MigrationMapping> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let mapping = self.insert_mapping(&tx, content_id, spec, overrides).await?;
        tx.commit().await?;
        Ok(mapping)
    }

    async fn get_mapping(&self, id: Uuid) -> Result<Option<MigrationMapping>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM {} WHERE id = $1",
                    MAPPING_COLUMNS,
                    self.table("migration_mappings")
                ),
                &[&id],
            )
            .await?;
        drop(client);
        Ok(self.with_overrides(rows).await?.into_iter().next())
    }

    async fn find_active_mapping(
        &self,
        source_table: &str,
        source_id: i64,
    ) -> Result<Option<MigrationMapping>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM {} WHERE source_table = $1 AND source_id = $2 AND is_active",
                    MAPPING_COLUMNS,
                    self.table("migration_mappings")
                ),
                &[&source_table, &source_id],
            )
            .await?;
        drop(client);
        Ok(self.with_overrides(rows).await?.into_iter().next())
    }

    async fn list_active_mappings(
        &self,
        source_table: &str,
        limit: usize,
    ) -> Result<Vec<MigrationMapping>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM {} WHERE source_table = $1 AND is_active
                     ORDER BY last_sync_at ASC NULLS FIRST, source_id
                     LIMIT $2",
                    MAPPING_COLUMNS,
                    self.table("migration_mappings")
                ),
                &[&source_table, &(limit as i64)],
            )
            .await?;
        drop(client);
        self.with_overrides(rows).await
    }

    async fn record_sync(&self, id: Uuid, at: DateTime<Utc>, error: Option<&str>) -> Result<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                &format!(
                    "UPDATE {} SET last_sync_at = $2, sync_error = $3 WHERE id = $1",
                    self.table("migration_mappings")
                ),
                &[&id, &at, &error],
            )
            .await?;
        if updated == 0 {
            return Err(MigrateError::Store(format!("mapping {} not found", id)));
        }
        Ok(())
    }

    async fn claim(
        &self,
        source_table: &str,
        source_id: i64,
        owner: &str,
        lease: Duration,
    ) -> Result<bool> {
        let client = self.pool.get().await?;
        let taken = client
            .execute(
                &format!(
                    "INSERT INTO {t} (source_table, source_id, owner, expires_at)
                     VALUES ($1, $2, $3, NOW() + make_interval(secs => $4))
                     ON CONFLICT (source_table, source_id) DO UPDATE SET
                        owner = EXCLUDED.owner,
                        expires_at = EXCLUDED.expires_at
                     WHERE {t}.expires_at < NOW() OR {t}.owner = EXCLUDED.owner",
                    t = self.table("migration_claims")
                ),
                &[&source_table, &source_id, &owner, &lease.as_secs_f64()],
            )
            .await?;
        Ok(taken == 1)
    }

    async fn release(&self, source_table: &str, source_id: i64, owner: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                &format!(
                    "DELETE FROM {} WHERE source_table = $1 AND source_id = $2 AND owner = $3",
                    self.table("migration_claims")
                ),
                &[&source_table, &source_id, &owner],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DestinationStore for PgStore {
    async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                &format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema)),
                &[],
            )
            .await?;

        client
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id UUID PRIMARY KEY,
                        content_type TEXT NOT NULL,
                        title TEXT NOT NULL,
                        slug TEXT NOT NULL UNIQUE,
                        body TEXT,
                        excerpt TEXT,
                        status TEXT NOT NULL,
                        published_at TIMESTAMPTZ,
                        meta_title TEXT,
                        meta_description TEXT,
                        fields JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                        metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    )",
                    self.table("content_items")
                ),
                &[],
            )
            .await?;

        client
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id UUID PRIMARY KEY,
                        source_table TEXT NOT NULL,
                        source_id BIGINT NOT NULL,
                        content_id UUID NOT NULL REFERENCES {}(id) ON DELETE CASCADE,
                        mapping_type TEXT NOT NULL CHECK (mapping_type IN ('import', 'sync')),
                        sync_direction TEXT NOT NULL CHECK (sync_direction IN ('legacy_to_cms', 'bidirectional')),
                        sync_frequency TEXT NOT NULL CHECK (sync_frequency IN ('manual', 'hourly', 'daily', 'weekly')),
                        is_active BOOLEAN NOT NULL DEFAULT TRUE,
                        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        last_sync_at TIMESTAMPTZ,
                        sync_error TEXT
                    )",
                    self.table("migration_mappings"),
                    self.table("content_items")
                ),
                &[],
            )
            .await?;

        // One active mapping per source row
        client
            .execute(
                &format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_migration_mappings_active
                        ON {}(source_table, source_id) WHERE is_active",
                    self.table("migration_mappings")
                ),
                &[],
            )
            .await?;

        client
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        mapping_id UUID NOT NULL REFERENCES {}(id) ON DELETE CASCADE,
                        position INTEGER NOT NULL,
                        field TEXT NOT NULL,
                        value_type TEXT NOT NULL CHECK (value_type IN ('string', 'integer', 'boolean', 'json', 'datetime')),
                        value JSONB NOT NULL,
                        PRIMARY KEY (mapping_id, field)
                    )",
                    self.table("mapping_field_overrides"),
                    self.table("migration_mappings")
                ),
                &[],
            )
            .await?;

        client
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        source_table TEXT NOT NULL,
                        source_id BIGINT NOT NULL,
                        owner TEXT NOT NULL,
                        expires_at TIMESTAMPTZ NOT NULL,
                        PRIMARY KEY (source_table, source_id)
                    )",
                    self.table("migration_claims")
                ),
                &[],
            )
            .await?;

        info!("Destination schema '{}' initialized", self.schema);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// Single transaction: content, mapping and overrides commit together.
    async fn import(
        &self,
        content: &NewContent,
        spec: &MappingSpec,
        overrides: &[FieldOverride],
    ) -> Result<(ContentRecord, MigrationMapping)> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let record = self.insert_content(&tx, content).await?;
        let mapping = self.insert_mapping(&tx, record.id, spec, overrides).await?;
        tx.commit().await?;
        Ok((record, mapping))
    }
}
