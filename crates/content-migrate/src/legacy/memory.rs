//! In-process legacy connector.
//!
//! Holds rows in memory behind a lock. Used by tests and by callers that
//! already have the legacy rows loaded (e.g. from an export file).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use tracing::error;

use super::{
    ArticleFilters, ColumnInfo, ConnectionState, ConnectionStatus, DuplicateExample,
    DuplicateSummary, IndexInfo, LegacyConnector, LegacyRecord,
};
use crate::config::LegacyColumns;

#[derive(Debug, Default)]
struct MemoryTable {
    /// Explicit schema; inferred from the rows when empty.
    columns: Vec<ColumnInfo>,
    indexes: Option<Vec<IndexInfo>>,
    rows: BTreeMap<i64, Map<String, Value>>,
}

/// Legacy connector backed by in-memory tables.
pub struct MemoryConnector {
    database: String,
    table: String,
    columns: LegacyColumns,
    tables: RwLock<HashMap<String, MemoryTable>>,
    reachable: RwLock<bool>,
}

impl MemoryConnector {
    /// Create a connector with an empty article table.
    pub fn new(table: impl Into<String>, columns: LegacyColumns) -> Self {
        let table = table.into();
        let mut tables = HashMap::new();
        tables.insert(table.clone(), MemoryTable::default());
        Self {
            database: "memory".to_string(),
            table,
            columns,
            tables: RwLock::new(tables),
            reachable: RwLock::new(true),
        }
    }

    /// Create a connector preloaded with article rows.
    pub fn with_records(
        table: impl Into<String>,
        columns: LegacyColumns,
        records: impl IntoIterator<Item = LegacyRecord>,
    ) -> Self {
        let connector = Self::new(table, columns);
        for record in records {
            connector.insert(record);
        }
        connector
    }

    /// Insert or replace an article row. The id column is filled from `record.id`.
    pub fn insert(&self, record: LegacyRecord) {
        let table = self.table.clone();
        self.insert_into(&table, record);
    }

    /// Insert or replace a row in any table.
    pub fn insert_into(&self, table: &str, record: LegacyRecord) {
        let mut fields = record.fields;
        fields
            .entry(self.columns.id.clone())
            .or_insert_with(|| Value::from(record.id));
        if let Ok(mut tables) = self.tables.write() {
            tables
                .entry(table.to_string())
                .or_default()
                .rows
                .insert(record.id, fields);
        }
    }

    /// Declare the schema of a table instead of inferring it from its rows.
    pub fn define_table(&self, table: &str, columns: Vec<ColumnInfo>, indexes: Vec<IndexInfo>) {
        if let Ok(mut tables) = self.tables.write() {
            let entry = tables.entry(table.to_string()).or_default();
            entry.columns = columns;
            entry.indexes = Some(indexes);
        }
    }

    /// Drop a table entirely.
    pub fn drop_table(&self, table: &str) {
        if let Ok(mut tables) = self.tables.write() {
            tables.remove(table);
        }
    }

    /// Simulate an outage: every call degrades as a failed query would.
    pub fn set_reachable(&self, reachable: bool) {
        if let Ok(mut flag) = self.reachable.write() {
            *flag = reachable;
        }
    }

    fn is_reachable(&self) -> bool {
        self.reachable.read().map(|r| *r).unwrap_or(false)
    }

    /// Run `f` against a table, returning `None` when unreachable or missing.
    fn with_table<T>(&self, table: &str, f: impl FnOnce(&MemoryTable) -> T) -> Option<T> {
        if !self.is_reachable() {
            error!("Legacy database unreachable while reading '{}'", table);
            return None;
        }
        let tables = self.tables.read().ok()?;
        match tables.get(table) {
            Some(t) => Some(f(t)),
            None => {
                error!("Legacy table '{}' does not exist", table);
                None
            }
        }
    }

    fn matches(&self, fields: &Map<String, Value>, filters: &ArticleFilters) -> bool {
        let text = |column: &str| -> Option<String> {
            match fields.get(column)? {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }
        };

        if let Some(status) = &filters.status {
            if text(&self.columns.status).as_deref() != Some(status.as_str()) {
                return false;
            }
        }
        if let Some(category) = &filters.category {
            if text(&self.columns.category).as_deref() != Some(category.as_str()) {
                return false;
            }
        }

        let (from, to) = filters.datetime_range();
        if from.is_some() || to.is_some() {
            let created = fields.get(&self.columns.created_at).and_then(value_datetime);
            let Some(created) = created else {
                return false;
            };
            if from.is_some_and(|from| created < from) || to.is_some_and(|to| created >= to) {
                return false;
            }
        }

        if let Some(search) = &filters.search {
            let needle = search.to_lowercase();
            let hit = [&self.columns.title, &self.columns.content]
                .iter()
                .filter_map(|c| text(c))
                .any(|v| v.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }

        true
    }

    fn record(id: i64, fields: &Map<String, Value>) -> LegacyRecord {
        LegacyRecord::new(id, fields.clone())
    }
}

fn value_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        Value::Number(n) => chrono::DateTime::from_timestamp(n.as_i64()?, 0).map(|d| d.naive_utc()),
        _ => None,
    }
}

fn infer_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "tinyint",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "double",
        Value::String(s) if value_datetime(value).is_some() && s.len() > 10 => "datetime",
        Value::String(s) if s.len() > 255 => "text",
        Value::Array(_) | Value::Object(_) => "json",
        _ => "varchar",
    }
}

#[async_trait]
impl LegacyConnector for MemoryConnector {
    fn table(&self) -> &str {
        &self.table
    }

    fn columns(&self) -> &LegacyColumns {
        &self.columns
    }

    async fn test_connection(&self) -> ConnectionStatus {
        let started = Instant::now();
        if !self.is_reachable() {
            return ConnectionStatus::failed(
                &self.database,
                "legacy database unreachable",
                started.elapsed().as_millis() as u64,
            );
        }
        let table_count = self.tables.read().map(|t| t.len()).unwrap_or(0);
        ConnectionStatus {
            status: ConnectionState::Success,
            database: self.database.clone(),
            table_count,
            message: format!("Connected to {} ({} tables)", self.database, table_count),
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn count_articles(&self, filters: &ArticleFilters) -> u64 {
        self.with_table(&self.table, |t| {
            t.rows.values().filter(|f| self.matches(f, filters)).count() as u64
        })
        .unwrap_or(0)
    }

    async fn fetch_articles(
        &self,
        limit: usize,
        offset: usize,
        filters: &ArticleFilters,
    ) -> Vec<LegacyRecord> {
        self.with_table(&self.table, |t| {
            t.rows
                .iter()
                .filter(|(_, f)| self.matches(f, filters))
                .skip(offset)
                .take(limit)
                .map(|(id, f)| Self::record(*id, f))
                .collect()
        })
        .unwrap_or_default()
    }

    async fn fetch_unmapped(
        &self,
        limit: usize,
        filters: &ArticleFilters,
        after_id: Option<i64>,
        mapped: &HashSet<i64>,
    ) -> Vec<LegacyRecord> {
        self.with_table(&self.table, |t| {
            t.rows
                .iter()
                .filter(|(id, _)| after_id.map_or(true, |after| **id > after))
                .filter(|(id, _)| !mapped.contains(*id))
                .filter(|(_, f)| self.matches(f, filters))
                .take(limit)
                .map(|(id, f)| Self::record(*id, f))
                .collect()
        })
        .unwrap_or_default()
    }

    async fn count_unmapped(
        &self,
        filters: &ArticleFilters,
        after_id: Option<i64>,
        mapped: &HashSet<i64>,
    ) -> u64 {
        self.with_table(&self.table, |t| {
            t.rows
                .iter()
                .filter(|(id, _)| after_id.map_or(true, |after| **id > after))
                .filter(|(id, _)| !mapped.contains(*id))
                .filter(|(_, f)| self.matches(f, filters))
                .count() as u64
        })
        .unwrap_or(0)
    }

    async fn fetch_by_id(&self, id: i64) -> Option<LegacyRecord> {
        self.with_table(&self.table, |t| {
            t.rows.get(&id).map(|f| Self::record(id, f))
        })
        .flatten()
    }

    async fn list_tables(&self) -> Vec<String> {
        if !self.is_reachable() {
            return Vec::new();
        }
        let mut names: Vec<String> = self
            .tables
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    async fn introspect(&self, table: &str) -> Vec<ColumnInfo> {
        self.with_table(table, |t| {
            if !t.columns.is_empty() {
                return t.columns.clone();
            }
            let mut seen: BTreeMap<String, &'static str> = BTreeMap::new();
            for fields in t.rows.values() {
                for (name, value) in fields {
                    if value.is_null() {
                        seen.entry(name.clone()).or_insert("varchar");
                    } else {
                        seen.insert(name.clone(), infer_type(value));
                    }
                }
            }
            seen.into_iter()
                .map(|(name, data_type)| ColumnInfo {
                    key: if name == self.columns.id {
                        "PRI".to_string()
                    } else {
                        String::new()
                    },
                    nullable: name != self.columns.id,
                    name,
                    data_type: data_type.to_string(),
                    default: None,
                })
                .collect()
        })
        .unwrap_or_default()
    }

    async fn indexes(&self, table: &str) -> Vec<IndexInfo> {
        self.with_table(table, |t| {
            t.indexes.clone().unwrap_or_else(|| {
                vec![IndexInfo {
                    name: "PRIMARY".to_string(),
                    columns: vec![self.columns.id.clone()],
                    unique: true,
                    primary: true,
                }]
            })
        })
        .unwrap_or_default()
    }

    async fn count_rows(&self, table: &str) -> u64 {
        self.with_table(table, |t| t.rows.len() as u64)
            .unwrap_or(0)
    }

    async fn count_orphans(
        &self,
        table: &str,
        column: &str,
        ref_table: &str,
        ref_column: &str,
    ) -> u64 {
        let targets: HashSet<String> = self
            .with_table(ref_table, |t| {
                t.rows
                    .values()
                    .filter_map(|f| f.get(ref_column))
                    .filter(|v| !v.is_null())
                    .map(value_key)
                    .collect()
            })
            .unwrap_or_default();

        self.with_table(table, |t| {
            t.rows
                .values()
                .filter_map(|f| f.get(column))
                .filter(|v| !v.is_null())
                .filter(|v| !targets.contains(&value_key(v)))
                .count() as u64
        })
        .unwrap_or(0)
    }

    async fn duplicate_values(
        &self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> DuplicateSummary {
        self.with_table(table, |t| {
            let mut counts: BTreeMap<String, u64> = BTreeMap::new();
            for value in t.rows.values().filter_map(|f| f.get(column)) {
                let key = value_key(value);
                if value.is_null() || key.trim().is_empty() {
                    continue;
                }
                *counts.entry(key).or_default() += 1;
            }
            let mut dupes: Vec<DuplicateExample> = counts
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .map(|(value, count)| DuplicateExample { value, count })
                .collect();
            dupes.sort_by(|a, b| b.count.cmp(&a.count).then(a.value.cmp(&b.value)));
            DuplicateSummary {
                groups: dupes.len() as u64,
                examples: dupes.into_iter().take(limit).collect(),
            }
        })
        .unwrap_or_default()
    }
}

fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
