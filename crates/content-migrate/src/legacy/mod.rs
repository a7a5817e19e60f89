//! Read-only access to the legacy content database.
//!
//! Every [`LegacyConnector`] method returns a plain value. Query failures are
//! logged and degrade to an empty result so that callers (validator, migrator)
//! can keep going and report the problem in their own terms.

mod memory;
mod mysql;

pub use memory::MemoryConnector;
pub use mysql::MysqlConnector;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::LegacyColumns;

/// One row of the legacy table. Never mutated by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyRecord {
    /// Primary key value.
    pub id: i64,
    /// Column name → value.
    pub fields: Map<String, Value>,
}

impl LegacyRecord {
    pub fn new(id: i64, fields: Map<String, Value>) -> Self {
        Self { id, fields }
    }

    /// Raw value of a column, `None` when absent.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    /// Column value as a non-empty trimmed string.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.fields.get(column)? {
            Value::Null => None,
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            other => Some(other.to_string()),
        }
    }

    /// Column value as an integer, accepting numeric strings.
    pub fn integer(&self, column: &str) -> Option<i64> {
        match self.fields.get(column)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Filters accepted by the article queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Inclusive lower bound on the created column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound (whole day) on the created column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    /// Substring of title or content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl ArticleFilters {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.category.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.search.is_none()
    }

    /// Half-open datetime range `[from, to)` covering the configured days.
    pub(crate) fn datetime_range(&self) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
        let from = self.date_from.and_then(|d| d.and_hms_opt(0, 0, 0));
        let to = self
            .date_to
            .and_then(|d| d.succ_opt())
            .and_then(|d| d.and_hms_opt(0, 0, 0));
        (from, to)
    }
}

/// Outcome of a connectivity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Success,
    Error,
}

/// Result of [`LegacyConnector::test_connection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: ConnectionState,
    pub database: String,
    pub table_count: usize,
    pub message: String,
    pub latency_ms: u64,
}

impl ConnectionStatus {
    pub fn is_success(&self) -> bool {
        self.status == ConnectionState::Success
    }

    pub(crate) fn failed(database: &str, message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            status: ConnectionState::Error,
            database: database.to_string(),
            table_count: 0,
            message: message.into(),
            latency_ms,
        }
    }
}

/// Column metadata from introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Lowercased database type name (e.g. `int`, `varchar`, `datetime`).
    pub data_type: String,
    pub nullable: bool,
    /// Key marker as reported by the database (`PRI`, `UNI`, `MUL` or empty).
    pub key: String,
    pub default: Option<String>,
}

/// Index metadata from introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

/// One duplicated value and how often it occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateExample {
    pub value: String,
    pub count: u64,
}

/// Result of [`LegacyConnector::duplicate_values`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSummary {
    /// Number of distinct values occurring more than once.
    pub groups: u64,
    /// Most frequent duplicates, capped by the requested limit.
    pub examples: Vec<DuplicateExample>,
}

/// Read-only access to the legacy schema.
#[async_trait]
pub trait LegacyConnector: Send + Sync {
    /// Name of the article table.
    fn table(&self) -> &str;

    /// Column names of the article table.
    fn columns(&self) -> &LegacyColumns;

    /// Check connectivity and count tables.
    async fn test_connection(&self) -> ConnectionStatus;

    /// Count articles matching the filters.
    async fn count_articles(&self, filters: &ArticleFilters) -> u64;

    /// Fetch a page of articles ordered by primary key.
    async fn fetch_articles(
        &self,
        limit: usize,
        offset: usize,
        filters: &ArticleFilters,
    ) -> Vec<LegacyRecord>;

    /// Fetch up to `limit` rows with id greater than `after_id` that are not in `mapped`.
    async fn fetch_unmapped(
        &self,
        limit: usize,
        filters: &ArticleFilters,
        after_id: Option<i64>,
        mapped: &HashSet<i64>,
    ) -> Vec<LegacyRecord>;

    /// Size of the set [`fetch_unmapped`](Self::fetch_unmapped) draws from.
    async fn count_unmapped(
        &self,
        filters: &ArticleFilters,
        after_id: Option<i64>,
        mapped: &HashSet<i64>,
    ) -> u64;

    /// Fetch a single article.
    async fn fetch_by_id(&self, id: i64) -> Option<LegacyRecord>;

    async fn list_tables(&self) -> Vec<String>;

    async fn introspect(&self, table: &str) -> Vec<ColumnInfo>;

    async fn indexes(&self, table: &str) -> Vec<IndexInfo>;

    async fn count_rows(&self, table: &str) -> u64;

    /// Rows of `table` whose non-null `column` has no match in `ref_table.ref_column`.
    async fn count_orphans(
        &self,
        table: &str,
        column: &str,
        ref_table: &str,
        ref_column: &str,
    ) -> u64;

    /// Non-empty values of `column` that occur more than once.
    async fn duplicate_values(&self, table: &str, column: &str, limit: usize)
        -> DuplicateSummary;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_text_trims_and_skips_empty() {
        let mut fields = Map::new();
        fields.insert("title".into(), json!("  Hello  "));
        fields.insert("blank".into(), json!("   "));
        fields.insert("views".into(), json!(12));
        fields.insert("nothing".into(), Value::Null);
        let record = LegacyRecord::new(1, fields);

        assert_eq!(record.text("title").as_deref(), Some("Hello"));
        assert_eq!(record.text("blank"), None);
        assert_eq!(record.text("views").as_deref(), Some("12"));
        assert_eq!(record.text("nothing"), None);
        assert_eq!(record.text("missing"), None);
    }

    #[test]
    fn test_record_integer_accepts_numeric_strings() {
        let mut fields = Map::new();
        fields.insert("parent".into(), json!("42"));
        fields.insert("other".into(), json!("abc"));
        let record = LegacyRecord::new(1, fields);
        assert_eq!(record.integer("parent"), Some(42));
        assert_eq!(record.integer("other"), None);
    }

    #[test]
    fn test_datetime_range_covers_whole_days() {
        let filters = ArticleFilters {
            date_from: NaiveDate::from_ymd_opt(2020, 1, 1),
            date_to: NaiveDate::from_ymd_opt(2020, 1, 31),
            ..Default::default()
        };
        let (from, to) = filters.datetime_range();
        assert_eq!(from.unwrap().to_string(), "2020-01-01 00:00:00");
        assert_eq!(to.unwrap().to_string(), "2020-02-01 00:00:00");
        assert!(!filters.is_empty());
        assert!(ArticleFilters::default().is_empty());
    }
}
