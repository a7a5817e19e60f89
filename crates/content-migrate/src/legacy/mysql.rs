//! MySQL/MariaDB legacy connector.
//!
//! Uses SQLx for connection pooling and async query execution. The pool is
//! created lazily so that a dead legacy server surfaces through
//! `test_connection` instead of at construction time.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, MySql, QueryBuilder, Row, TypeInfo, ValueRef};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use super::{
    ArticleFilters, ColumnInfo, ConnectionState, ConnectionStatus, DuplicateExample,
    DuplicateSummary, IndexInfo, LegacyConnector, LegacyRecord,
};
use crate::config::{LegacyColumns, SourceConfig};
use crate::error::{MigrateError, Result};

/// Rows read per round trip while scanning for unmapped ids.
const KEYSET_CHUNK: usize = 500;

/// MySQL/MariaDB legacy connector.
pub struct MysqlConnector {
    pool: MySqlPool,
    database: String,
    table: String,
    columns: LegacyColumns,
}

impl MysqlConnector {
    /// Create a connector from configuration without opening a connection.
    pub fn new(config: &SourceConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(MySqlSslMode::Preferred);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy_with(options);

        info!("Legacy source configured: {}", config.display_url());

        Self {
            pool,
            database: config.database.clone(),
            table: config.table.clone(),
            columns: config.columns.clone(),
        }
    }

    /// Quote a MySQL identifier.
    fn quote_ident(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn article_table(&self) -> String {
        Self::quote_ident(&self.table)
    }

    /// Append `AND ...` clauses for the filters.
    fn push_filters<'a>(&self, qb: &mut QueryBuilder<'a, MySql>, filters: &'a ArticleFilters) {
        if let Some(status) = &filters.status {
            qb.push(format!(" AND {} = ", Self::quote_ident(&self.columns.status)));
            qb.push_bind(status.as_str());
        }
        if let Some(category) = &filters.category {
            qb.push(format!(" AND {} = ", Self::quote_ident(&self.columns.category)));
            qb.push_bind(category.as_str());
        }

        let created = Self::quote_ident(&self.columns.created_at);
        let (from, to) = filters.datetime_range();
        if let Some(from) = from {
            qb.push(format!(" AND {} >= ", created));
            qb.push_bind(from);
        }
        if let Some(to) = to {
            qb.push(format!(" AND {} < ", created));
            qb.push_bind(to);
        }

        if let Some(search) = &filters.search {
            let pattern = format!("%{}%", search);
            qb.push(format!(
                " AND ({} LIKE ",
                Self::quote_ident(&self.columns.title)
            ));
            qb.push_bind(pattern.clone());
            qb.push(format!(" OR {} LIKE ", Self::quote_ident(&self.columns.content)));
            qb.push_bind(pattern);
            qb.push(")");
        }
    }

    /// Column name to JSON value for every column of a row.
    fn row_fields(row: &MySqlRow) -> Map<String, Value> {
        let mut fields = Map::new();
        for (i, column) in row.columns().iter().enumerate() {
            let data_type = column.type_info().name().to_lowercase();
            fields.insert(column.name().to_string(), Self::value_at(row, i, &data_type));
        }
        fields
    }

    fn row_to_record(&self, row: &MySqlRow) -> Option<LegacyRecord> {
        let fields = Self::row_fields(row);
        let id = record_id(&fields, &self.columns.id)?;
        Some(LegacyRecord::new(id, fields))
    }

    /// Convert one column of a MySQL row to a JSON value.
    fn value_at(row: &MySqlRow, i: usize, data_type: &str) -> Value {
        let is_null: bool = row.try_get_raw(i).map(|r| r.is_null()).unwrap_or(true);
        if is_null {
            return Value::Null;
        }

        match data_type {
            // Integer types
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => row
                .try_get::<i64, _>(i)
                .map(Value::from)
                .unwrap_or(Value::Null),
            t if t.ends_with("unsigned") => row
                .try_get::<u64, _>(i)
                .map(Value::from)
                .unwrap_or(Value::Null),

            // Floating point
            "float" => row
                .try_get::<f32, _>(i)
                .map(|v| Value::from(v as f64))
                .unwrap_or(Value::Null),
            "double" | "real" => row
                .try_get::<f64, _>(i)
                .map(Value::from)
                .unwrap_or(Value::Null),

            // Decimal kept as text to preserve precision
            "decimal" | "numeric" => row
                .try_get::<rust_decimal::Decimal, _>(i)
                .map(|d| Value::String(d.to_string()))
                .unwrap_or(Value::Null),

            // Boolean
            "bit" | "boolean" | "bool" => row
                .try_get::<bool, _>(i)
                .map(Value::Bool)
                .unwrap_or(Value::Null),

            // Binary types
            "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => row
                .try_get::<Vec<u8>, _>(i)
                .map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))
                .unwrap_or(Value::Null),

            // Date/Time types
            "date" => row
                .try_get::<chrono::NaiveDate, _>(i)
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null),
            "time" => row
                .try_get::<chrono::NaiveTime, _>(i)
                .map(|t| Value::String(t.format("%H:%M:%S").to_string()))
                .unwrap_or(Value::Null),
            "datetime" | "timestamp" => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .map(|d| Value::String(d.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Null),

            "json" => row
                .try_get::<String, _>(i)
                .map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s)))
                .unwrap_or(Value::Null),

            // Strings and everything else
            _ => row
                .try_get::<String, _>(i)
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }

    async fn try_test_connection(&self) -> Result<usize> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL connection"))?;

        let row = sqlx::query(
            "SELECT CAST(COUNT(*) AS SIGNED) AS cnt FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = ?",
        )
        .bind(&self.database)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("cnt") as usize)
    }

    async fn try_count(&self, filters: &ArticleFilters) -> Result<u64> {
        let mut qb = QueryBuilder::<MySql>::new(format!(
            "SELECT CAST(COUNT(*) AS SIGNED) FROM {} WHERE 1=1",
            self.article_table()
        ));
        self.push_filters(&mut qb, filters);
        let count: i64 = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn try_fetch(
        &self,
        limit: usize,
        offset: usize,
        filters: &ArticleFilters,
        after_id: Option<i64>,
    ) -> Result<Vec<LegacyRecord>> {
        let page = self.try_fetch_page(limit, offset, filters, after_id).await?;
        Ok(page.records)
    }

    async fn try_fetch_page(
        &self,
        limit: usize,
        offset: usize,
        filters: &ArticleFilters,
        after_id: Option<i64>,
    ) -> Result<KeysetPage> {
        let id = Self::quote_ident(&self.columns.id);
        let mut qb = QueryBuilder::<MySql>::new(format!(
            "SELECT * FROM {} WHERE 1=1",
            self.article_table()
        ));
        if let Some(after) = after_id {
            qb.push(format!(" AND {} > ", id));
            qb.push_bind(after);
        }
        self.push_filters(&mut qb, filters);
        qb.push(format!(" ORDER BY {} LIMIT ", id));
        qb.push_bind(limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(offset as i64);

        let rows: Vec<MySqlRow> = qb.build().fetch_all(&self.pool).await?;
        Ok(KeysetPage::from_rows(
            rows.iter().map(Self::row_fields).collect(),
            &self.columns.id,
        ))
    }

    /// Keyset scan that skips mapped ids until `limit` rows are collected.
    ///
    /// The cursor follows the raw rows returned, so rows dropped for a
    /// malformed id neither end the scan early nor get fetched twice.
    async fn try_fetch_unmapped(
        &self,
        limit: usize,
        filters: &ArticleFilters,
        after_id: Option<i64>,
        mapped: &HashSet<i64>,
    ) -> Result<Vec<LegacyRecord>> {
        let mut out = Vec::with_capacity(limit);
        let mut cursor = after_id;
        let chunk = limit.max(KEYSET_CHUNK);

        while out.len() < limit {
            let page = self.try_fetch_page(chunk, 0, filters, cursor).await?;
            let exhausted = page.fetched < chunk;
            let next = page.advance(cursor);
            out.extend(
                page.records
                    .into_iter()
                    .filter(|r| !mapped.contains(&r.id))
                    .take(limit - out.len()),
            );
            if exhausted {
                break;
            }
            match next {
                Some(next) => cursor = Some(next),
                None => {
                    error!(
                        "Stopping scan after {:?}: a full page had no usable '{}' value",
                        cursor, self.columns.id
                    );
                    break;
                }
            }
        }

        debug!(
            "Fetched {} unmapped rows after {:?} ({} mapped ids known)",
            out.len(),
            after_id,
            mapped.len()
        );
        Ok(out)
    }

    async fn try_count_unmapped(
        &self,
        filters: &ArticleFilters,
        after_id: Option<i64>,
        mapped: &HashSet<i64>,
    ) -> Result<u64> {
        let id = Self::quote_ident(&self.columns.id);
        let mut qb = QueryBuilder::<MySql>::new(format!(
            "SELECT CAST({} AS SIGNED) FROM {} WHERE 1=1",
            id,
            self.article_table()
        ));
        if let Some(after) = after_id {
            qb.push(format!(" AND {} > ", id));
            qb.push_bind(after);
        }
        self.push_filters(&mut qb, filters);

        let ids: Vec<i64> = qb.build_query_scalar::<i64>().fetch_all(&self.pool).await?;
        Ok(ids.iter().filter(|id| !mapped.contains(id)).count() as u64)
    }

    async fn try_fetch_by_id(&self, id: i64) -> Result<Option<LegacyRecord>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? LIMIT 1",
            self.article_table(),
            Self::quote_ident(&self.columns.id)
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| self.row_to_record(&r)))
    }

    async fn try_list_tables(&self) -> Result<Vec<String>> {
        let rows: Vec<MySqlRow> = sqlx::query(
            r#"
            SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
            "#,
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrateError::pool(e, "listing MySQL tables"))?;

        Ok(rows.iter().map(|r| r.get("TABLE_NAME")).collect())
    }

    async fn try_introspect(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        // CAST to CHAR to handle collation differences
        let query = r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(DATA_TYPE AS CHAR(255)) AS DATA_TYPE,
                IF(IS_NULLABLE = 'YES', 1, 0) AS is_nullable,
                CAST(COLUMN_KEY AS CHAR(16)) AS COLUMN_KEY,
                CAST(COLUMN_DEFAULT AS CHAR(255)) AS COLUMN_DEFAULT
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "loading MySQL columns"))?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get::<String, _>("COLUMN_NAME"),
                data_type: row.get::<String, _>("DATA_TYPE").to_lowercase(),
                nullable: row.get::<i32, _>("is_nullable") == 1,
                key: row.get::<String, _>("COLUMN_KEY"),
                default: row.get::<Option<String>, _>("COLUMN_DEFAULT"),
            })
            .collect())
    }

    async fn try_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        let query = r#"
            SELECT
                CAST(INDEX_NAME AS CHAR(255)) AS INDEX_NAME,
                GROUP_CONCAT(CAST(COLUMN_NAME AS CHAR(255)) ORDER BY SEQ_IN_INDEX) AS columns,
                IF(NON_UNIQUE = 0, 1, 0) AS is_unique
            FROM INFORMATION_SCHEMA.STATISTICS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            GROUP BY INDEX_NAME, NON_UNIQUE
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "loading MySQL indexes"))?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("INDEX_NAME");
                let columns_str: String = row.get("columns");
                IndexInfo {
                    primary: name == "PRIMARY",
                    name,
                    columns: columns_str.split(',').map(|s| s.to_string()).collect(),
                    unique: row.get::<i32, _>("is_unique") == 1,
                }
            })
            .collect())
    }

    async fn try_count_rows(&self, table: &str) -> Result<u64> {
        let sql = format!(
            "SELECT CAST(COUNT(*) AS SIGNED) FROM {}",
            Self::quote_ident(table)
        );
        let count: i64 = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn try_count_orphans(
        &self,
        table: &str,
        column: &str,
        ref_table: &str,
        ref_column: &str,
    ) -> Result<u64> {
        let sql = format!(
            "SELECT CAST(COUNT(*) AS SIGNED) FROM {} a LEFT JOIN {} b ON a.{} = b.{} \
             WHERE a.{} IS NOT NULL AND b.{} IS NULL",
            Self::quote_ident(table),
            Self::quote_ident(ref_table),
            Self::quote_ident(column),
            Self::quote_ident(ref_column),
            Self::quote_ident(column),
            Self::quote_ident(ref_column),
        );
        let count: i64 = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn try_duplicates(
        &self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<DuplicateSummary> {
        let col = Self::quote_ident(column);
        let sql = format!(
            "SELECT CAST({col} AS CHAR) AS value, CAST(COUNT(*) AS SIGNED) AS cnt \
             FROM {table} WHERE {col} IS NOT NULL AND {col} <> '' \
             GROUP BY {col} HAVING COUNT(*) > 1 ORDER BY cnt DESC",
            col = col,
            table = Self::quote_ident(table),
        );
        let rows: Vec<MySqlRow> = sqlx::query(&sql).fetch_all(&self.pool).await?;

        Ok(DuplicateSummary {
            groups: rows.len() as u64,
            examples: rows
                .iter()
                .take(limit)
                .map(|r| DuplicateExample {
                    value: r.get::<Option<String>, _>("value").unwrap_or_default(),
                    count: r.get::<i64, _>("cnt").max(0) as u64,
                })
                .collect(),
        })
    }
}

/// Log a failed legacy query and fall back to the degraded value.
/// Numeric id of a row, or `None` (logged) when the id column is unusable.
fn record_id(fields: &Map<String, Value>, id_column: &str) -> Option<i64> {
    let id = match fields.get(id_column) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    if id.is_none() {
        error!("Skipping legacy row without numeric '{}' column", id_column);
    }
    id
}

/// One page of a keyset scan.
#[derive(Debug)]
struct KeysetPage {
    records: Vec<LegacyRecord>,
    /// Rows returned by the query, including dropped ones.
    fetched: usize,
    /// Greatest id among the raw rows.
    last_id: Option<i64>,
}

impl KeysetPage {
    fn from_rows(rows: Vec<Map<String, Value>>, id_column: &str) -> Self {
        let fetched = rows.len();
        let mut last_id = None;
        let mut records = Vec::with_capacity(fetched);
        for fields in rows {
            if let Some(id) = record_id(&fields, id_column) {
                last_id = last_id.max(Some(id));
                records.push(LegacyRecord::new(id, fields));
            }
        }
        Self {
            records,
            fetched,
            last_id,
        }
    }

    /// Next cursor, `None` when the page cannot move past `cursor`.
    fn advance(&self, cursor: Option<i64>) -> Option<i64> {
        self.last_id.filter(|last| cursor.map_or(true, |c| *last > c))
    }
}

fn degrade<T>(operation: &str, result: Result<T>, fallback: T) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            error!("Legacy query '{}' failed: {}", operation, e);
            fallback
        }
    }
}

#[async_trait]
impl LegacyConnector for MysqlConnector {
    fn table(&self) -> &str {
        &self.table
    }

    fn columns(&self) -> &LegacyColumns {
        &self.columns
    }

    async fn test_connection(&self) -> ConnectionStatus {
        let started = Instant::now();
        let result = self.try_test_connection().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(table_count) => ConnectionStatus {
                status: ConnectionState::Success,
                database: self.database.clone(),
                table_count,
                message: format!(
                    "Connected to {} ({} tables, {}ms)",
                    self.database, table_count, latency_ms
                ),
                latency_ms,
            },
            Err(e) => {
                error!("Legacy connection test failed: {}", e);
                ConnectionStatus::failed(&self.database, e.to_string(), latency_ms)
            }
        }
    }

    async fn count_articles(&self, filters: &ArticleFilters) -> u64 {
        degrade("count_articles", self.try_count(filters).await, 0)
    }

    async fn fetch_articles(
        &self,
        limit: usize,
        offset: usize,
        filters: &ArticleFilters,
    ) -> Vec<LegacyRecord> {
        degrade(
            "fetch_articles",
            self.try_fetch(limit, offset, filters, None).await,
            Vec::new(),
        )
    }

    async fn fetch_unmapped(
        &self,
        limit: usize,
        filters: &ArticleFilters,
        after_id: Option<i64>,
        mapped: &HashSet<i64>,
    ) -> Vec<LegacyRecord> {
        degrade(
            "fetch_unmapped",
            self.try_fetch_unmapped(limit, filters, after_id, mapped)
                .await,
            Vec::new(),
        )
    }

    async fn count_unmapped(
        &self,
        filters: &ArticleFilters,
        after_id: Option<i64>,
        mapped: &HashSet<i64>,
    ) -> u64 {
        degrade(
            "count_unmapped",
            self.try_count_unmapped(filters, after_id, mapped).await,
            0,
        )
    }

    async fn fetch_by_id(&self, id: i64) -> Option<LegacyRecord> {
        degrade("fetch_by_id", self.try_fetch_by_id(id).await, None)
    }

    async fn list_tables(&self) -> Vec<String> {
        degrade("list_tables", self.try_list_tables().await, Vec::new())
    }

    async fn introspect(&self, table: &str) -> Vec<ColumnInfo> {
        degrade("introspect", self.try_introspect(table).await, Vec::new())
    }

    async fn indexes(&self, table: &str) -> Vec<IndexInfo> {
        degrade("indexes", self.try_indexes(table).await, Vec::new())
    }

    async fn count_rows(&self, table: &str) -> u64 {
        degrade("count_rows", self.try_count_rows(table).await, 0)
    }

    async fn count_orphans(
        &self,
        table: &str,
        column: &str,
        ref_table: &str,
        ref_column: &str,
    ) -> u64 {
        degrade(
            "count_orphans",
            self.try_count_orphans(table, column, ref_table, ref_column)
                .await,
            0,
        )
    }

    async fn duplicate_values(
        &self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> DuplicateSummary {
        degrade(
            "duplicate_values",
            self.try_duplicates(table, column, limit).await,
            DuplicateSummary::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_ident_escapes_backticks() {
        assert_eq!(MysqlConnector::quote_ident("articles"), "`articles`");
        assert_eq!(MysqlConnector::quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_degrade_returns_fallback_on_error() {
        let ok: Result<u64> = Ok(5);
        assert_eq!(degrade("op", ok, 0), 5);
        let err: Result<u64> = Err(MigrateError::Connection("down".into()));
        assert_eq!(degrade("op", err, 0), 0);
    }

    fn raw(id: Value) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("id".into(), id);
        fields.insert("title".into(), json!("t"));
        fields
    }

    #[test]
    fn test_page_cursor_moves_past_dropped_rows() {
        let page = KeysetPage::from_rows(
            vec![raw(json!(11)), raw(json!("12")), raw(json!(null)), raw(json!(14))],
            "id",
        );
        assert_eq!(page.fetched, 4);
        let ids: Vec<i64> = page.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![11, 12, 14]);
        assert_eq!(page.advance(Some(10)), Some(14));

        // Trailing malformed rows do not shorten the page
        let page = KeysetPage::from_rows(
            vec![raw(json!(21)), raw(json!("x")), raw(json!(null))],
            "id",
        );
        assert_eq!(page.fetched, 3);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.advance(Some(20)), Some(21));
    }

    #[test]
    fn test_page_without_usable_ids_stops_the_scan() {
        let page = KeysetPage::from_rows(vec![raw(json!("x")), raw(json!(null))], "id");
        assert_eq!(page.fetched, 2);
        assert!(page.records.is_empty());
        assert_eq!(page.advance(Some(5)), None);

        let page = KeysetPage::from_rows(vec![raw(json!(5))], "id");
        assert_eq!(page.advance(Some(5)), None);
        assert_eq!(page.advance(None), Some(5));
    }
}
