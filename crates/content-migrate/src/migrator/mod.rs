//! Batch migration of legacy rows into destination content.
//!
//! A batch reads up to `batch_size` rows without an active mapping (the
//! active mapping set doubles as the work queue), and for each row:
//!
//! 1. Claims the row so concurrent runs skip it, then skips it anyway if
//!    another run mapped it since the batch was read
//! 2. Cleans and checks it, transforms the mapped fields
//! 3. Resolves a unique slug and imports content + mapping together
//!
//! Row failures are counted and never abort the batch.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, FieldMapping, MappingType, MigrationConfig, SyncFrequency};
use crate::error::{MigrateError, Result};
use crate::legacy::{ArticleFilters, LegacyConnector, LegacyRecord};
use crate::store::{
    ContentStore, DestinationStore, FieldOverride, MappingSpec, MappingStore, MigrationMapping,
    NewContent,
};
use crate::transform::{html, Transformer};
use crate::validator::{clean_data_for_migration, validate_article_for_migration};

/// Numeric suffixes tried after the bare slug before giving up.
const MAX_SLUG_ATTEMPTS: usize = 1000;

/// Per-batch options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub content_type: String,
    #[serde(default)]
    pub filters: ArticleFilters,
    /// Only rows with a greater source id are considered.
    #[serde(default)]
    pub after_id: Option<i64>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub preserve_hierarchy: bool,
    #[serde(default)]
    pub create_redirects: bool,
    #[serde(default)]
    pub mapping_type: MappingType,
    #[serde(default)]
    pub sync_frequency: SyncFrequency,
    /// Recorded in content metadata and used as the claim owner.
    #[serde(default)]
    pub job_id: Option<String>,
}

impl BatchOptions {
    /// Options taken from the `migration` section of the configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::from_migration(&config.migration)
    }

    pub fn from_migration(migration: &MigrationConfig) -> Self {
        Self {
            batch_size: migration.batch_size,
            content_type: migration.content_type.clone(),
            filters: ArticleFilters::default(),
            after_id: None,
            dry_run: false,
            preserve_hierarchy: migration.preserve_hierarchy,
            create_redirects: migration.create_redirects,
            mapping_type: migration.mapping_type,
            sync_frequency: migration.sync_frequency,
            job_id: None,
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_migration(&MigrationConfig::default())
    }
}

/// Overall outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every fetched row was migrated or skipped.
    Completed,
    /// At least one row failed.
    CompletedWithErrors,
    /// No unmapped rows were left.
    Empty,
}

/// A row that failed inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub source_id: i64,
    pub message: String,
}

/// A non-blocking finding for a migrated row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowWarning {
    pub source_id: i64,
    pub message: String,
}

/// Counters for one batch. `success + errors + skipped == total`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: u64,
    pub success: u64,
    pub errors: u64,
    pub skipped: u64,
    pub error_details: Vec<RowError>,
}

/// Legacy URL to new URL pair. Only reported, never executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectDescriptor {
    pub source_id: i64,
    pub from: String,
    pub to: String,
    pub status_code: u16,
}

/// Result of [`Migrator::migrate_batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub status: BatchStatus,
    pub message: String,
    pub stats: BatchStats,
    /// Highest source id fetched in this batch, whatever its outcome.
    pub last_source_id: Option<i64>,
    pub redirects: Vec<RedirectDescriptor>,
    pub warnings: Vec<RowWarning>,
}

/// Outcome of a single row.
enum RowOutcome {
    Migrated {
        slug: String,
        redirect: Option<RedirectDescriptor>,
        warnings: Vec<String>,
    },
    Skipped(String),
}

/// Outcome of [`Migrator::sync_mapping`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub mapping_id: Uuid,
    pub source_id: i64,
    pub content_id: Uuid,
    pub updated: bool,
    pub error: Option<String>,
}

/// Totals of [`Migrator::sync_active_mappings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub total: u64,
    pub updated: u64,
    pub failed: u64,
    pub outcomes: Vec<SyncOutcome>,
}

/// Moves legacy rows into the destination store.
pub struct Migrator {
    connector: Arc<dyn LegacyConnector>,
    store: Arc<dyn DestinationStore>,
    transformer: Transformer,
    config: Config,
    field_mappings: Vec<FieldMapping>,
    overrides: Vec<FieldOverride>,
    worker_id: String,
    /// Slugs handed out by dry-run batches, which never reach the store.
    dry_run_slugs: Mutex<HashSet<String>>,
}

impl Migrator {
    pub fn new(
        connector: Arc<dyn LegacyConnector>,
        store: Arc<dyn DestinationStore>,
        transformer: Transformer,
        config: Config,
    ) -> Self {
        let field_mappings = config
            .migration
            .effective_field_mappings(&config.source.columns);
        let overrides = FieldOverride::from_rules(&config.migration.field_overrides);
        Self {
            connector,
            store,
            transformer,
            config,
            field_mappings,
            overrides,
            worker_id: format!("migrator-{}", Uuid::new_v4()),
            dry_run_slugs: Mutex::new(HashSet::new()),
        }
    }

    pub fn connector(&self) -> &Arc<dyn LegacyConnector> {
        &self.connector
    }

    pub fn store(&self) -> &Arc<dyn DestinationStore> {
        &self.store
    }

    /// Number of rows a run would still have to process.
    pub async fn count_remaining(
        &self,
        filters: &ArticleFilters,
        after_id: Option<i64>,
    ) -> Result<u64> {
        let mapped = self.store.active_source_ids(self.connector.table()).await?;
        Ok(self.connector.count_unmapped(filters, after_id, &mapped).await)
    }

    /// Migrate one batch of unmapped rows.
    ///
    /// Only infrastructure failures outside the per-row boundary are returned
    /// as `Err`.
    pub async fn migrate_batch(&self, options: &BatchOptions) -> Result<BatchResult> {
        let table = self.connector.table().to_string();
        let mapped = self.store.active_source_ids(&table).await?;
        let rows = self
            .connector
            .fetch_unmapped(options.batch_size, &options.filters, options.after_id, &mapped)
            .await;

        let mut stats = BatchStats {
            total: rows.len() as u64,
            ..Default::default()
        };
        let last_source_id = rows.iter().map(|r| r.id).max();

        if rows.is_empty() {
            return Ok(BatchResult {
                status: BatchStatus::Empty,
                message: "No unmapped rows left".to_string(),
                stats,
                last_source_id,
                redirects: Vec::new(),
                warnings: Vec::new(),
            });
        }

        debug!(
            "Batch of {} rows from {} (after {:?}, dry_run={})",
            rows.len(),
            table,
            options.after_id,
            options.dry_run
        );

        let mut reserved = if options.dry_run {
            self.take_dry_run_slugs()
        } else {
            HashSet::new()
        };
        let mut redirects = Vec::new();
        let mut warnings = Vec::new();

        for record in &rows {
            match self.migrate_row(record, options, &mut reserved).await {
                Ok(RowOutcome::Migrated {
                    slug,
                    redirect,
                    warnings: row_warnings,
                }) => {
                    stats.success += 1;
                    debug!("Row {} -> '{}'", record.id, slug);
                    warnings.extend(row_warnings.into_iter().map(|message| RowWarning {
                        source_id: record.id,
                        message,
                    }));
                    if let Some(redirect) = redirect {
                        info!("Redirect {} -> {} (301)", redirect.from, redirect.to);
                        redirects.push(redirect);
                    }
                }
                Ok(RowOutcome::Skipped(reason)) => {
                    stats.skipped += 1;
                    debug!("Row {} skipped: {}", record.id, reason);
                }
                Err(e) => {
                    stats.errors += 1;
                    error!("Failed to migrate row {} from {}: {}", record.id, table, e);
                    stats.error_details.push(RowError {
                        source_id: record.id,
                        message: e.to_string(),
                    });
                }
            }
        }

        if options.dry_run {
            self.keep_dry_run_slugs(reserved);
        }

        let status = if stats.errors > 0 {
            BatchStatus::CompletedWithErrors
        } else {
            BatchStatus::Completed
        };
        let verb = if options.dry_run { "Would migrate" } else { "Migrated" };
        let message = format!(
            "{} {} of {} rows ({} errors, {} skipped)",
            verb, stats.success, stats.total, stats.errors, stats.skipped
        );

        Ok(BatchResult {
            status,
            message,
            stats,
            last_source_id,
            redirects,
            warnings,
        })
    }

    fn take_dry_run_slugs(&self) -> HashSet<String> {
        let mut slugs = self
            .dry_run_slugs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *slugs)
    }

    fn keep_dry_run_slugs(&self, reserved: HashSet<String>) {
        self.dry_run_slugs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(reserved);
    }

    async fn migrate_row(
        &self,
        record: &LegacyRecord,
        options: &BatchOptions,
        reserved: &mut HashSet<String>,
    ) -> Result<RowOutcome> {
        if options.dry_run {
            return self.import_row(record, options, reserved).await;
        }

        let table = self.connector.table();
        let owner = options.job_id.as_deref().unwrap_or(&self.worker_id);
        let lease = Duration::from_secs(self.config.migration.claim_lease_secs);

        if !self.store.claim(table, record.id, owner, lease).await? {
            return Ok(RowOutcome::Skipped("claimed by another worker".to_string()));
        }

        let outcome = match self.store.find_active_mapping(table, record.id).await {
            Ok(Some(mapping)) => Ok(RowOutcome::Skipped(format!(
                "already mapped to content {}",
                mapping.content_id
            ))),
            Ok(None) => self.import_row(record, options, reserved).await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.store.release(table, record.id, owner).await {
            warn!("Failed to release claim on row {}: {}", record.id, e);
        }
        outcome
    }

    async fn import_row(
        &self,
        record: &LegacyRecord,
        options: &BatchOptions,
        reserved: &mut HashSet<String>,
    ) -> Result<RowOutcome> {
        let columns = &self.config.source.columns;
        let cleaned = clean_data_for_migration(record, columns);
        let check = validate_article_for_migration(&cleaned, columns);
        let mut warnings = check.warnings;
        warnings.extend(check.errors);

        let mut content = self.build_content(&cleaned, &options.content_type, &self.overrides);
        content.metadata = self.metadata(record, options, &warnings);

        let base = if content.slug.is_empty() {
            html::slugify(&content.title)
        } else {
            html::slugify(&content.slug)
        };
        let base = if base.is_empty() {
            html::slugify(&format!("{}-{}", options.content_type, record.id))
        } else {
            base
        };
        if content.title.is_empty() {
            content.title = format!("Untitled {} #{}", options.content_type, record.id);
        }
        content.slug = self.unique_slug(&base, reserved).await?;
        reserved.insert(content.slug.clone());

        let redirect = options
            .create_redirects
            .then(|| self.redirect(record, &content.slug, &options.content_type));

        if options.dry_run {
            return Ok(RowOutcome::Migrated {
                slug: content.slug,
                redirect,
                warnings,
            });
        }

        let spec = MappingSpec {
            source_table: self.connector.table().to_string(),
            source_id: record.id,
            mapping_type: options.mapping_type,
            sync_direction: self.config.migration.sync_direction,
            sync_frequency: options.sync_frequency,
        };
        let (created, mapping) = self.store.import(&content, &spec, &self.overrides).await?;
        debug!(
            "Created content {} and mapping {} for row {}",
            created.id, mapping.id, record.id
        );

        Ok(RowOutcome::Migrated {
            slug: created.slug,
            redirect,
            warnings,
        })
    }

    /// Transform a cleaned row and apply overrides.
    fn build_content(
        &self,
        cleaned: &LegacyRecord,
        content_type: &str,
        overrides: &[FieldOverride],
    ) -> NewContent {
        let fields = self
            .transformer
            .transform_record(cleaned, &self.field_mappings);
        let mut content = NewContent::from_fields(content_type, fields);
        for field_override in overrides {
            content.apply_override(field_override);
        }
        content
    }

    fn metadata(
        &self,
        record: &LegacyRecord,
        options: &BatchOptions,
        warnings: &[String],
    ) -> Value {
        let mut metadata = Map::new();
        metadata.insert("legacy_id".into(), json!(record.id));
        metadata.insert("legacy_table".into(), json!(self.connector.table()));
        metadata.insert("legacy_data".into(), Value::Object(record.fields.clone()));
        metadata.insert("migrated_at".into(), json!(Utc::now().to_rfc3339()));
        if let Some(job_id) = &options.job_id {
            metadata.insert("job_id".into(), json!(job_id));
        }
        if options.preserve_hierarchy {
            if let Some(column) = &self.config.source.columns.parent_id {
                if let Some(parent) = record.integer(column) {
                    metadata.insert("legacy_parent_id".into(), json!(parent));
                }
            }
        }
        if !warnings.is_empty() {
            metadata.insert("migration_warnings".into(), json!(warnings));
        }
        Value::Object(metadata)
    }

    /// First free slug among `base`, `base-1`, ..., `base-1000`.
    async fn unique_slug(&self, base: &str, reserved: &HashSet<String>) -> Result<String> {
        for suffix in 0..=MAX_SLUG_ATTEMPTS {
            let candidate = if suffix == 0 {
                base.to_string()
            } else {
                format!("{}-{}", base, suffix)
            };
            if !reserved.contains(&candidate) && !self.store.slug_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(MigrateError::Store(format!(
            "no free slug for '{}' after {} attempts",
            base, MAX_SLUG_ATTEMPTS
        )))
    }

    fn redirect(
        &self,
        record: &LegacyRecord,
        slug: &str,
        content_type: &str,
    ) -> RedirectDescriptor {
        let migration = &self.config.migration;
        let legacy_slug = record
            .text(&self.config.source.columns.slug)
            .unwrap_or_else(|| slug.to_string());
        RedirectDescriptor {
            source_id: record.id,
            from: migration
                .legacy_url_pattern
                .replace("{id}", &record.id.to_string())
                .replace("{slug}", &legacy_slug),
            to: migration
                .new_url_pattern
                .replace("{content_type}", content_type)
                .replace("{slug}", slug),
            status_code: 301,
        }
    }

    /// Re-apply the legacy row to its content record.
    ///
    /// The slug is preserved. Failures are recorded on the mapping and
    /// reported in the outcome; only store errors while recording them are
    /// returned as `Err`.
    pub async fn sync_mapping(&self, mapping: &MigrationMapping) -> Result<SyncOutcome> {
        let result = self.resync(mapping).await;
        let now = Utc::now();

        let error = match &result {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    "Sync of mapping {} (row {}) failed: {}",
                    mapping.id, mapping.source_id, e
                );
                Some(e.to_string())
            }
        };
        self.store
            .record_sync(mapping.id, now, error.as_deref())
            .await?;

        Ok(SyncOutcome {
            mapping_id: mapping.id,
            source_id: mapping.source_id,
            content_id: mapping.content_id,
            updated: error.is_none(),
            error,
        })
    }

    async fn resync(&self, mapping: &MigrationMapping) -> Result<()> {
        let record = self
            .connector
            .fetch_by_id(mapping.source_id)
            .await
            .ok_or_else(|| {
                MigrateError::Store(format!(
                    "legacy row {} not found in {}",
                    mapping.source_id, mapping.source_table
                ))
            })?;
        let existing = self
            .store
            .get_content(mapping.content_id)
            .await?
            .ok_or_else(|| {
                MigrateError::Store(format!("content {} not found", mapping.content_id))
            })?;

        let cleaned = clean_data_for_migration(&record, &self.config.source.columns);
        let mut content = self.build_content(&cleaned, &existing.content_type, &mapping.overrides);
        if content.title.is_empty() {
            content.title = existing.title.clone();
        }
        content.slug = existing.slug.clone();

        let mut metadata = match existing.metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        metadata.insert("legacy_data".into(), Value::Object(record.fields.clone()));
        metadata.insert("last_synced_at".into(), json!(Utc::now().to_rfc3339()));
        content.metadata = Value::Object(metadata);

        self.store.update_content(existing.id, &content).await?;
        Ok(())
    }

    /// Sync up to `limit` active mappings, least recently synced first.
    pub async fn sync_active_mappings(&self, limit: usize) -> Result<SyncSummary> {
        let mappings = self
            .store
            .list_active_mappings(self.connector.table(), limit)
            .await?;

        let mut summary = SyncSummary {
            total: mappings.len() as u64,
            ..Default::default()
        };
        for mapping in &mappings {
            let outcome = self.sync_mapping(mapping).await?;
            if outcome.updated {
                summary.updated += 1;
            } else {
                summary.failed += 1;
            }
            summary.outcomes.push(outcome);
        }

        info!(
            "Synced {} mappings ({} updated, {} failed)",
            summary.total, summary.updated, summary.failed
        );
        Ok(summary)
    }
}
