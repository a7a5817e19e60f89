//! Destination content and mapping storage.
//!
//! The migrator writes through two interfaces:
//!
//! - [`ContentStore`]: content records and slug probing
//! - [`MappingStore`]: source→content mappings, per-field overrides, row claims
//!
//! [`DestinationStore`] combines both and adds [`DestinationStore::import`],
//! which creates a content record together with its mapping so that neither
//! exists without the other.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{create_pool, quote_ident, PgStore};

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::config::{FieldOverrideRule, MappingType, SyncDirection, SyncFrequency};
use crate::error::{MigrateError, Result};
use crate::transform::values;

/// A record in the destination content schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: Uuid,
    pub content_type: String,
    pub title: String,
    pub slug: String,
    pub body: Option<String>,
    pub excerpt: Option<String>,
    pub status: String,
    pub published_at: Option<DateTime<Utc>>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    /// Mapped fields without a dedicated column.
    pub fields: Map<String, Value>,
    /// Provenance: legacy id and table, raw payload, job id, migration time.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for creating or updating a content record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewContent {
    pub content_type: String,
    pub title: String,
    pub slug: String,
    pub body: Option<String>,
    pub excerpt: Option<String>,
    pub status: String,
    pub published_at: Option<DateTime<Utc>>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub fields: Map<String, Value>,
    pub metadata: Value,
}

impl NewContent {
    /// Split a transformed field set into dedicated columns and extra fields.
    ///
    /// Title and slug are left empty when absent; callers apply fallbacks.
    pub fn from_fields(content_type: &str, mut fields: Map<String, Value>) -> Self {
        let mut take_text = |name: &str| -> Option<String> {
            match fields.remove(name)? {
                Value::Null => None,
                Value::String(s) if s.trim().is_empty() => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            }
        };

        let title = take_text("title").unwrap_or_default();
        let slug = take_text("slug").unwrap_or_default();
        let body = take_text("body");
        let excerpt = take_text("excerpt");
        let status = take_text("status").unwrap_or_else(|| values::FALLBACK_STATUS.to_string());
        let published_at = take_text("published_at")
            .and_then(|s| values::parse_datetime(&Value::String(s)));
        let meta_title = take_text("meta_title");
        let meta_description = take_text("meta_description");

        Self {
            content_type: content_type.to_string(),
            title,
            slug,
            body,
            excerpt,
            status,
            published_at,
            meta_title,
            meta_description,
            fields,
            metadata: Value::Object(Map::new()),
        }
    }

    /// Apply a field override, on a dedicated column or in `fields`.
    pub fn apply_override(&mut self, field_override: &FieldOverride) {
        let value = field_override.value.to_json();
        let text = || match &value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        };

        match field_override.field.as_str() {
            "title" => self.title = text().unwrap_or_default(),
            "slug" => self.slug = text().unwrap_or_default(),
            "body" => self.body = text(),
            "excerpt" => self.excerpt = text(),
            "status" => {
                self.status = text().unwrap_or_else(|| values::FALLBACK_STATUS.to_string())
            }
            "published_at" => self.published_at = values::parse_datetime(&value),
            "meta_title" => self.meta_title = text(),
            "meta_description" => self.meta_description = text(),
            other => {
                self.fields.insert(other.to_string(), value);
            }
        }
    }
}

/// Typed per-field override value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OverrideValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Json(Value),
    DateTime(DateTime<Utc>),
}

impl OverrideValue {
    /// Build from a type tag and a raw JSON value.
    pub fn from_raw(value_type: &str, raw: &Value) -> Result<Self> {
        let invalid = || {
            MigrateError::Store(format!(
                "override value {} is not a valid {}",
                raw, value_type
            ))
        };
        match value_type {
            "string" => Ok(OverrideValue::String(
                values::scalar_text(raw).ok_or_else(invalid)?,
            )),
            "integer" => match raw {
                Value::Number(n) => n.as_i64().map(OverrideValue::Integer).ok_or_else(invalid),
                Value::String(s) => s
                    .trim()
                    .parse()
                    .map(OverrideValue::Integer)
                    .map_err(|_| invalid()),
                _ => Err(invalid()),
            },
            "boolean" => match raw {
                Value::Bool(b) => Ok(OverrideValue::Boolean(*b)),
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "1" | "yes" => Ok(OverrideValue::Boolean(true)),
                    "false" | "0" | "no" => Ok(OverrideValue::Boolean(false)),
                    _ => Err(invalid()),
                },
                Value::Number(n) => Ok(OverrideValue::Boolean(n.as_i64() != Some(0))),
                _ => Err(invalid()),
            },
            "json" => Ok(OverrideValue::Json(raw.clone())),
            "datetime" => values::parse_datetime(raw)
                .map(OverrideValue::DateTime)
                .ok_or_else(invalid),
            other => Err(MigrateError::Store(format!(
                "unknown override value type '{}'",
                other
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            OverrideValue::String(_) => "string",
            OverrideValue::Integer(_) => "integer",
            OverrideValue::Boolean(_) => "boolean",
            OverrideValue::Json(_) => "json",
            OverrideValue::DateTime(_) => "datetime",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            OverrideValue::String(s) => Value::String(s.clone()),
            OverrideValue::Integer(i) => Value::from(*i),
            OverrideValue::Boolean(b) => Value::Bool(*b),
            OverrideValue::Json(v) => v.clone(),
            OverrideValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
        }
    }
}

/// Value that takes precedence over the transformed value of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOverride {
    pub field: String,
    pub value: OverrideValue,
}

impl FieldOverride {
    /// Convert configured override rules, skipping invalid ones.
    pub fn from_rules(rules: &[FieldOverrideRule]) -> Vec<FieldOverride> {
        rules
            .iter()
            .filter_map(|rule| match OverrideValue::from_raw(&rule.value_type, &rule.value) {
                Ok(value) => Some(FieldOverride {
                    field: rule.field.clone(),
                    value,
                }),
                Err(e) => {
                    warn!("Ignoring override for '{}': {}", rule.field, e);
                    None
                }
            })
            .collect()
    }
}

/// Mapping attributes chosen by the migrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSpec {
    pub source_table: String,
    pub source_id: i64,
    pub mapping_type: MappingType,
    pub sync_direction: SyncDirection,
    pub sync_frequency: SyncFrequency,
}

/// Link between one legacy row and one content record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationMapping {
    pub id: Uuid,
    pub source_table: String,
    pub source_id: i64,
    pub content_id: Uuid,
    pub mapping_type: MappingType,
    pub sync_direction: SyncDirection,
    pub sync_frequency: SyncFrequency,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_error: Option<String>,
    /// Ordered overrides applied after transformation.
    pub overrides: Vec<FieldOverride>,
}

/// Content record persistence.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Whether any content record uses `slug`.
    async fn slug_exists(&self, slug: &str) -> Result<bool>;

    async fn create_content(&self, content: &NewContent) -> Result<ContentRecord>;

    /// Replace everything except id, slug and created_at.
    async fn update_content(&self, id: Uuid, content: &NewContent) -> Result<ContentRecord>;

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentRecord>>;

    /// Returns `false` if nothing was deleted.
    async fn delete_content(&self, id: Uuid) -> Result<bool>;
}

/// Mapping, override and claim persistence.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Source ids of `source_table` with an active mapping.
    async fn active_source_ids(&self, source_table: &str) -> Result<HashSet<i64>>;

    /// Create an active mapping. Fails if one is already active for the source row.
    async fn create_mapping(
        &self,
        content_id: Uuid,
        spec: &MappingSpec,
        overrides: &[FieldOverride],
    ) -> Result<MigrationMapping>;

    async fn get_mapping(&self, id: Uuid) -> Result<Option<MigrationMapping>>;

    async fn find_active_mapping(
        &self,
        source_table: &str,
        source_id: i64,
    ) -> Result<Option<MigrationMapping>>;

    /// Active mappings ordered by least recently synced first.
    async fn list_active_mappings(
        &self,
        source_table: &str,
        limit: usize,
    ) -> Result<Vec<MigrationMapping>>;

    /// Stamp a sync attempt; `error` of `None` clears a previous error.
    async fn record_sync(&self, id: Uuid, at: DateTime<Utc>, error: Option<&str>) -> Result<()>;

    /// Take or renew a lease on a source row. Returns `false` while another
    /// owner holds an unexpired lease.
    async fn claim(
        &self,
        source_table: &str,
        source_id: i64,
        owner: &str,
        lease: Duration,
    ) -> Result<bool>;

    /// Drop a lease held by `owner`.
    async fn release(&self, source_table: &str, source_id: i64, owner: &str) -> Result<()>;
}

/// Full destination interface used by the migrator.
#[async_trait]
pub trait DestinationStore: ContentStore + MappingStore {
    /// Create tables and indexes. Idempotent.
    async fn init_schema(&self) -> Result<()>;

    /// Short name for logs.
    fn backend_type(&self) -> &'static str;

    /// Cheap round trip used by health checks.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Create a content record and its mapping as one unit.
    ///
    /// The default implementation deletes the content record again when the
    /// mapping cannot be created.
    async fn import(
        &self,
        content: &NewContent,
        spec: &MappingSpec,
        overrides: &[FieldOverride],
    ) -> Result<(ContentRecord, MigrationMapping)> {
        let record = self.create_content(content).await?;
        match self.create_mapping(record.id, spec, overrides).await {
            Ok(mapping) => Ok((record, mapping)),
            Err(e) => {
                if let Err(cleanup) = self.delete_content(record.id).await {
                    warn!(
                        "Failed to remove content {} after mapping error: {}",
                        record.id, cleanup
                    );
                }
                Err(e)
            }
        }
    }
}

pub(crate) fn mapping_type_to_str(value: MappingType) -> &'static str {
    match value {
        MappingType::Import => "import",
        MappingType::Sync => "sync",
    }
}

pub(crate) fn str_to_mapping_type(s: &str) -> Result<MappingType> {
    match s {
        "import" => Ok(MappingType::Import),
        "sync" => Ok(MappingType::Sync),
        _ => Err(MigrateError::Store(format!("Invalid mapping type: {}", s))),
    }
}

pub(crate) fn sync_direction_to_str(value: SyncDirection) -> &'static str {
    match value {
        SyncDirection::LegacyToCms => "legacy_to_cms",
        SyncDirection::Bidirectional => "bidirectional",
    }
}

pub(crate) fn str_to_sync_direction(s: &str) -> Result<SyncDirection> {
    match s {
        "legacy_to_cms" => Ok(SyncDirection::LegacyToCms),
        "bidirectional" => Ok(SyncDirection::Bidirectional),
        _ => Err(MigrateError::Store(format!("Invalid sync direction: {}", s))),
    }
}

pub(crate) fn sync_frequency_to_str(value: SyncFrequency) -> &'static str {
    match value {
        SyncFrequency::Manual => "manual",
        SyncFrequency::Hourly => "hourly",
        SyncFrequency::Daily => "daily",
        SyncFrequency::Weekly => "weekly",
    }
}

pub(crate) fn str_to_sync_frequency(s: &str) -> Result<SyncFrequency> {
    match s {
        "manual" => Ok(SyncFrequency::Manual),
        "hourly" => Ok(SyncFrequency::Hourly),
        "daily" => Ok(SyncFrequency::Daily),
        "weekly" => Ok(SyncFrequency::Weekly),
        _ => Err(MigrateError::Store(format!("Invalid sync frequency: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_fields_splits_columns() {
        let fields: Map<String, Value> = serde_json::from_value(json!({
            "title": "Hello",
            "slug": "",
            "body": "<p>x</p>",
            "status": "published",
            "published_at": "2020-01-05T10:00:00Z",
            "tags": ["a", "b"],
            "category": "news"
        }))
        .unwrap();
        let content = NewContent::from_fields("article", fields);
        assert_eq!(content.title, "Hello");
        assert_eq!(content.slug, "");
        assert_eq!(content.body.as_deref(), Some("<p>x</p>"));
        assert_eq!(content.status, "published");
        assert_eq!(
            content.published_at.unwrap().to_rfc3339(),
            "2020-01-05T10:00:00+00:00"
        );
        assert_eq!(content.fields.len(), 2);
        assert_eq!(content.fields["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_missing_status_defaults_to_draft() {
        let content = NewContent::from_fields("page", Map::new());
        assert_eq!(content.status, "draft");
        assert_eq!(content.content_type, "page");
    }

    #[test]
    fn test_override_values() {
        assert_eq!(
            OverrideValue::from_raw("integer", &json!("42")).unwrap(),
            OverrideValue::Integer(42)
        );
        assert_eq!(
            OverrideValue::from_raw("boolean", &json!("yes")).unwrap(),
            OverrideValue::Boolean(true)
        );
        assert!(OverrideValue::from_raw("integer", &json!("forty")).is_err());
        assert!(OverrideValue::from_raw("datetime", &json!("never")).is_err());
        assert!(OverrideValue::from_raw("float", &json!(1.0)).is_err());

        let dt = OverrideValue::from_raw("datetime", &json!("2021-06-01 12:00:00")).unwrap();
        assert_eq!(dt.type_name(), "datetime");
        assert_eq!(dt.to_json(), json!("2021-06-01T12:00:00+00:00"));
    }

    #[test]
    fn test_apply_override() {
        let mut content = NewContent::from_fields("article", Map::new());
        content.apply_override(&FieldOverride {
            field: "status".into(),
            value: OverrideValue::String("archived".into()),
        });
        content.apply_override(&FieldOverride {
            field: "featured".into(),
            value: OverrideValue::Boolean(true),
        });
        assert_eq!(content.status, "archived");
        assert_eq!(content.fields["featured"], json!(true));
    }

    #[test]
    fn test_from_rules_skips_invalid() {
        let rules = vec![
            FieldOverrideRule {
                field: "priority".into(),
                value_type: "integer".into(),
                value: json!(3),
            },
            FieldOverrideRule {
                field: "broken".into(),
                value_type: "integer".into(),
                value: json!("x"),
            },
        ];
        let overrides = FieldOverride::from_rules(&rules);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].value, OverrideValue::Integer(3));
    }

    #[test]
    fn test_status_string_helpers() {
        assert_eq!(
            str_to_sync_frequency(sync_frequency_to_str(SyncFrequency::Weekly)).unwrap(),
            SyncFrequency::Weekly
        );
        assert!(str_to_mapping_type("copy").is_err());
    }
}
