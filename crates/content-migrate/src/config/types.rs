//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::transform::TransformKind;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Legacy source database (MySQL/MariaDB).
    pub source: SourceConfig,

    /// Destination content database (PostgreSQL).
    pub target: TargetConfig,

    /// Batch loop and mapping behavior.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Field cleaning rules.
    #[serde(default)]
    pub transform: TransformConfig,

    /// Pre-flight validation rules.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Job ledger settings.
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// Legacy source database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (only "mysql" is supported).
    #[serde(default = "default_mysql")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Table holding the legacy articles (default: "articles").
    #[serde(default = "default_articles_table")]
    pub table: String,

    /// Column name overrides for the legacy table.
    #[serde(default)]
    pub columns: LegacyColumns,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_source_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Column names of the legacy article table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyColumns {
    #[serde(default = "default_col_id")]
    pub id: String,
    #[serde(default = "default_col_title")]
    pub title: String,
    #[serde(default = "default_col_content")]
    pub content: String,
    #[serde(default = "default_col_slug")]
    pub slug: String,
    #[serde(default = "default_col_status")]
    pub status: String,
    #[serde(default = "default_col_category")]
    pub category: String,
    #[serde(default = "default_col_created")]
    pub created_at: String,
    #[serde(default = "default_col_updated")]
    pub updated_at: String,
    /// Parent reference used when hierarchy is preserved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Default for LegacyColumns {
    fn default() -> Self {
        Self {
            id: default_col_id(),
            title: default_col_title(),
            content: default_col_content(),
            slug: default_col_slug(),
            status: default_col_status(),
            category: default_col_category(),
            created_at: default_col_created(),
            updated_at: default_col_updated(),
            parent_id: None,
        }
    }
}

/// Destination database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (only "postgres" is supported).
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema holding content and mapping tables (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_target_connections")]
    pub max_connections: usize,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Batch loop and mapping behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows per batch (default: 50).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches in milliseconds (default: 500).
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Content type label given to created records (default: "article").
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Mapping type recorded on new mappings.
    #[serde(default)]
    pub mapping_type: MappingType,

    /// Sync direction recorded on new mappings.
    #[serde(default)]
    pub sync_direction: SyncDirection,

    /// Sync frequency recorded on new mappings.
    #[serde(default)]
    pub sync_frequency: SyncFrequency,

    /// Log redirect descriptors for migrated rows.
    #[serde(default)]
    pub create_redirects: bool,

    /// Keep the legacy parent reference in metadata.
    #[serde(default)]
    pub preserve_hierarchy: bool,

    /// Legacy URL pattern; `{id}` and `{slug}` are substituted.
    #[serde(default = "default_legacy_url_pattern")]
    pub legacy_url_pattern: String,

    /// New canonical URL pattern; `{content_type}` and `{slug}` are substituted.
    #[serde(default = "default_new_url_pattern")]
    pub new_url_pattern: String,

    /// Seconds a row claim stays valid (default: 300).
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,

    /// Target field → source field rules. Empty means the built-in defaults.
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,

    /// Overrides attached to every new mapping.
    #[serde(default)]
    pub field_overrides: Vec<FieldOverrideRule>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            content_type: default_content_type(),
            mapping_type: MappingType::default(),
            sync_direction: SyncDirection::default(),
            sync_frequency: SyncFrequency::default(),
            create_redirects: false,
            preserve_hierarchy: false,
            legacy_url_pattern: default_legacy_url_pattern(),
            new_url_pattern: default_new_url_pattern(),
            claim_lease_secs: default_claim_lease_secs(),
            field_mappings: Vec::new(),
            field_overrides: Vec::new(),
        }
    }
}

impl MigrationConfig {
    /// Effective field mappings: configured rules or defaults derived from the legacy columns.
    pub fn effective_field_mappings(&self, columns: &LegacyColumns) -> Vec<FieldMapping> {
        if !self.field_mappings.is_empty() {
            return self.field_mappings.clone();
        }

        let rule = |target: &str, source: &str| FieldMapping {
            target: target.to_string(),
            source: source.to_string(),
            transform: None,
            max_length: None,
        };

        vec![
            rule("title", &columns.title),
            rule("slug", &columns.slug),
            rule("body", &columns.content),
            rule("excerpt", "summary"),
            rule("status", &columns.status),
            rule("published_at", &columns.created_at),
            rule("meta_title", "meta_title"),
            rule("meta_description", "meta_description"),
            rule("tags", "tags"),
            rule("category", &columns.category),
        ]
    }
}

/// Declarative target ← source field rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Destination field name.
    pub target: String,

    /// Legacy column name.
    pub source: String,

    /// Explicit transform; resolved from the target name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformKind>,

    /// Maximum length for text fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

/// Configured override applied to every new mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOverrideRule {
    /// Destination field name.
    pub field: String,

    /// Value type tag: string, integer, boolean, json, datetime.
    #[serde(default = "default_override_type")]
    pub value_type: String,

    /// Raw value, interpreted according to `value_type`.
    pub value: serde_json::Value,
}

/// How a mapping was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    /// One-shot import.
    #[default]
    Import,
    /// Import kept in sync with the legacy row.
    Sync,
}

/// Which side is authoritative during sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    #[default]
    LegacyToCms,
    Bidirectional,
}

/// How often a mapping should be resynced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFrequency {
    #[default]
    Manual,
    Hourly,
    Daily,
    Weekly,
}

/// Field cleaning rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Legacy status value → destination status.
    #[serde(default = "default_status_map")]
    pub status_map: BTreeMap<String, String>,

    /// Delimiter for tag/category lists (default: ",").
    #[serde(default = "default_tag_delimiter")]
    pub tag_delimiter: String,

    /// Asset path prefixes used by the legacy system.
    #[serde(default = "default_legacy_asset_prefixes")]
    pub legacy_asset_prefixes: Vec<String>,

    /// Replacement prefix for rewritten asset paths.
    #[serde(default = "default_media_prefix")]
    pub media_prefix: String,

    /// Title truncation length (default: 255).
    #[serde(default = "default_title_max_length")]
    pub title_max_length: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            status_map: default_status_map(),
            tag_delimiter: default_tag_delimiter(),
            legacy_asset_prefixes: default_legacy_asset_prefixes(),
            media_prefix: default_media_prefix(),
            title_max_length: default_title_max_length(),
        }
    }
}

/// Pre-flight validation rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Tables that must exist. Defaults to the source table.
    #[serde(default)]
    pub required_tables: Vec<String>,

    /// Columns that must exist in the source table. Defaults to id/title/content.
    #[serde(default)]
    pub required_columns: Vec<String>,

    /// Columns whose absence is only a warning. Defaults to slug/status/category/dates.
    #[serde(default)]
    pub optional_columns: Vec<String>,

    /// Expected type family per column (integer, decimal, string, datetime, boolean).
    #[serde(default)]
    pub column_types: BTreeMap<String, String>,

    /// Foreign-key-like references to check for orphans.
    #[serde(default)]
    pub references: Vec<ReferenceCheck>,

    /// Rows sampled by the integrity check (default: 100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<usize>,
}

impl ValidationConfig {
    pub fn get_sample_size(&self) -> usize {
        self.sample_size.unwrap_or(100)
    }
}

/// Orphan check: `table.column` must exist in `ref_table.ref_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCheck {
    pub column: String,
    pub ref_table: String,
    #[serde(default = "default_col_id")]
    pub ref_column: String,
}

/// Durable job store selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobBackend {
    /// Jobs table in the destination database.
    #[default]
    Database,
    /// Signed JSON files in `state_dir`.
    File,
}

/// Job ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default)]
    pub backend: JobBackend,

    /// Directory for the file backend (default: ".content-migrate/jobs").
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Schema holding the jobs table for the database backend.
    #[serde(default = "default_job_schema")]
    pub job_schema: String,

    /// Lifetime of the in-process job snapshot in seconds (default: 3600).
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Entries kept per log list (default: 100).
    #[serde(default = "default_log_window")]
    pub log_window: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            backend: JobBackend::default(),
            state_dir: default_state_dir(),
            job_schema: default_job_schema(),
            cache_ttl_secs: default_cache_ttl_secs(),
            log_window: default_log_window(),
        }
    }
}

// Default value functions for serde
fn default_mysql() -> String {
    "mysql".to_string()
}

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_pg_port() -> u16 {
    5432
}

fn default_articles_table() -> String {
    "articles".to_string()
}

fn default_source_connections() -> u32 {
    4
}

fn default_target_connections() -> usize {
    4
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_col_id() -> String {
    "id".to_string()
}

fn default_col_title() -> String {
    "title".to_string()
}

fn default_col_content() -> String {
    "content".to_string()
}

fn default_col_slug() -> String {
    "slug".to_string()
}

fn default_col_status() -> String {
    "status".to_string()
}

fn default_col_category() -> String {
    "category".to_string()
}

fn default_col_created() -> String {
    "created_at".to_string()
}

fn default_col_updated() -> String {
    "updated_at".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_batch_delay_ms() -> u64 {
    500
}

fn default_content_type() -> String {
    "article".to_string()
}

fn default_legacy_url_pattern() -> String {
    "/article.php?id={id}".to_string()
}

fn default_new_url_pattern() -> String {
    "/{content_type}/{slug}".to_string()
}

fn default_claim_lease_secs() -> u64 {
    300
}

fn default_override_type() -> String {
    "string".to_string()
}

fn default_status_map() -> BTreeMap<String, String> {
    [
        ("1", "published"),
        ("published", "published"),
        ("active", "published"),
        ("live", "published"),
        ("0", "draft"),
        ("draft", "draft"),
        ("inactive", "draft"),
        ("pending", "pending"),
        ("review", "pending"),
        ("archived", "archived"),
        ("deleted", "archived"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_tag_delimiter() -> String {
    ",".to_string()
}

fn default_legacy_asset_prefixes() -> Vec<String> {
    vec!["/uploads/".to_string(), "/images/".to_string()]
}

fn default_media_prefix() -> String {
    "/media/legacy/".to_string()
}

fn default_title_max_length() -> usize {
    255
}

fn default_state_dir() -> String {
    ".content-migrate/jobs".to_string()
}

fn default_job_schema() -> String {
    "_content_migrate".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_log_window() -> usize {
    100
}
