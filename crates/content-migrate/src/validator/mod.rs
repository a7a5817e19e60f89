//! Pre-flight validation of the legacy database.
//!
//! The [`Validator`] only reads. It combines connectivity, structure,
//! integrity and performance checks into a [`ValidationReport`] whose status
//! decides whether a migration may start.

mod article;

pub use article::{
    clean_data_for_migration, validate_article_for_migration, ArticleCheck, MAX_TITLE_LENGTH,
};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::legacy::{ArticleFilters, LegacyConnector};
use crate::transform::values;

/// Row count above which batch processing is recommended.
pub const BATCH_RECOMMENDATION_ROWS: u64 = 10_000;
/// Row count above which smaller batches are recommended.
pub const SMALL_BATCH_RECOMMENDATION_ROWS: u64 = 50_000;
/// Duplicate examples kept per column.
const DUPLICATE_EXAMPLES: usize = 10;

/// Overall report status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Warning,
    Error,
}

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Notice,
    Warning,
    Error,
}

/// Classify a defect rate with integer arithmetic.
///
/// Above 10% is an error, 5% to 10% inclusive is a warning, anything lower is
/// a notice.
pub fn classify_rate(defects: u64, sample: u64) -> Severity {
    if sample == 0 {
        return Severity::Notice;
    }
    let scaled = defects * 100;
    if scaled > 10 * sample {
        Severity::Error
    } else if scaled >= 5 * sample {
        Severity::Warning
    } else {
        Severity::Notice
    }
}

/// Outcome of one named check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Warning,
    Failed,
    Skipped,
}

/// One named check in a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub outcome: TestOutcome,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

/// Categorized validation findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: ReportStatus,
    pub tests: Vec<TestResult>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub notices: Vec<String>,
    pub recommendations: Vec<String>,
    pub validated_at: DateTime<Utc>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            status: ReportStatus::Success,
            tests: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            notices: Vec::new(),
            recommendations: Vec::new(),
            validated_at: Utc::now(),
        }
    }
}

impl ValidationReport {
    /// Record a finding at the given severity.
    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Error => self.errors.push(message),
            Severity::Warning => self.warnings.push(message),
            Severity::Notice => self.notices.push(message),
        }
    }

    fn test(&mut self, name: &str, outcome: TestOutcome, message: impl Into<String>, details: Value) {
        self.tests.push(TestResult {
            name: name.to_string(),
            outcome,
            message: message.into(),
            details,
        });
    }

    /// Append another report's findings.
    pub fn merge(&mut self, other: ValidationReport) {
        self.tests.extend(other.tests);
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
        self.notices.extend(other.notices);
        self.recommendations.extend(other.recommendations);
        self.finalize();
    }

    /// Recompute `status` from the findings.
    pub fn finalize(&mut self) {
        self.status = if !self.errors.is_empty() {
            ReportStatus::Error
        } else if !self.warnings.is_empty() {
            ReportStatus::Warning
        } else {
            ReportStatus::Success
        };
    }

    pub fn has_errors(&self) -> bool {
        self.status == ReportStatus::Error
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Outcome for a check given the findings it produced.
fn outcome_of(report: &ValidationReport) -> TestOutcome {
    if !report.errors.is_empty() {
        TestOutcome::Failed
    } else if !report.warnings.is_empty() {
        TestOutcome::Warning
    } else {
        TestOutcome::Passed
    }
}

/// Broad type family of a MySQL data type.
pub fn type_family(data_type: &str) -> &'static str {
    match data_type.to_lowercase().as_str() {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => "integer",
        "decimal" | "numeric" | "float" | "double" | "real" => "decimal",
        "date" | "datetime" | "timestamp" | "time" | "year" => "datetime",
        "bit" | "bool" | "boolean" => "boolean",
        _ => "string",
    }
}

fn family_matches(expected: &str, actual_type: &str) -> bool {
    let actual = type_family(actual_type);
    // MySQL stores booleans as tinyint
    actual == expected || (expected == "boolean" && actual_type.eq_ignore_ascii_case("tinyint"))
}

/// Read-only pre-flight checks against a legacy connector.
pub struct Validator {
    connector: Arc<dyn LegacyConnector>,
    config: Config,
}

impl Validator {
    pub fn new(connector: Arc<dyn LegacyConnector>, config: Config) -> Self {
        Self { connector, config }
    }

    /// Required tables and columns exist; optional columns and types are as expected.
    pub async fn validate_structure(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let table = self.connector.table().to_string();

        let tables = self.connector.list_tables().await;
        for required in self.config.required_tables() {
            if !tables.iter().any(|t| t == &required) {
                report.push(
                    Severity::Error,
                    format!("Required table '{}' not found", required),
                );
            }
        }

        let columns = if tables.iter().any(|t| t == &table) {
            self.connector.introspect(&table).await
        } else {
            Vec::new()
        };

        if !columns.is_empty() {
            for required in self.config.required_columns() {
                if !columns.iter().any(|c| c.name == required) {
                    report.push(
                        Severity::Error,
                        format!("Required column '{}.{}' not found", table, required),
                    );
                }
            }
            for optional in self.config.optional_columns() {
                if !columns.iter().any(|c| c.name == optional) {
                    report.push(
                        Severity::Warning,
                        format!("Optional column '{}.{}' not found", table, optional),
                    );
                }
            }
            for (name, expected) in self.config.column_types() {
                if let Some(column) = columns.iter().find(|c| c.name == name) {
                    if !family_matches(&expected, &column.data_type) {
                        report.push(
                            Severity::Warning,
                            format!(
                                "Column '{}.{}' has type '{}', expected {}",
                                table, name, column.data_type, expected
                            ),
                        );
                    }
                }
            }
        } else if tables.iter().any(|t| t == &table) {
            report.push(
                Severity::Error,
                format!("Could not introspect columns of '{}'", table),
            );
        }

        let outcome = outcome_of(&report);
        let message = format!(
            "{} tables, {} columns in '{}'",
            tables.len(),
            columns.len(),
            table
        );
        report.test(
            "structure",
            outcome,
            message,
            json!({ "tables": tables.len(), "columns": columns.len() }),
        );
        report.finalize();
        report
    }

    /// Sample rows and measure defect rates, orphans and duplicates.
    pub async fn validate_integrity(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let table = self.connector.table().to_string();
        let columns = self.connector.columns().clone();

        let total = self.connector.count_rows(&table).await;
        let sample_size = (self.config.validation.get_sample_size() as u64).min(total) as usize;
        let sample = self
            .connector
            .fetch_articles(sample_size, 0, &ArticleFilters::default())
            .await;
        let sampled = sample.len() as u64;

        if sampled == 0 {
            report.push(Severity::Notice, format!("Table '{}' has no rows to sample", table));
        }

        let has_column = |name: &str| sample.iter().any(|r| r.fields.contains_key(name));

        let mut categories: Vec<(&str, u64)> = vec![
            (
                "missing title",
                sample.iter().filter(|r| r.text(&columns.title).is_none()).count() as u64,
            ),
            (
                "missing content",
                sample
                    .iter()
                    .filter(|r| r.text(&columns.content).is_none())
                    .count() as u64,
            ),
        ];
        if has_column(&columns.created_at) {
            let invalid = sample
                .iter()
                .filter(|r| match r.get(&columns.created_at) {
                    None | Some(Value::Null) => false,
                    Some(v) => values::parse_datetime(v).is_none(),
                })
                .count() as u64;
            categories.push(("invalid date", invalid));
        }
        if has_column(&columns.slug) {
            let missing = sample
                .iter()
                .filter(|r| r.text(&columns.slug).is_none())
                .count() as u64;
            categories.push(("missing slug", missing));
        }

        let mut rates = serde_json::Map::new();
        for (category, defects) in &categories {
            rates.insert(category.to_string(), json!(defects));
            if *defects == 0 {
                continue;
            }
            let severity = classify_rate(*defects, sampled);
            report.push(
                severity,
                format!(
                    "{} of {} sampled rows ({:.1}%) have {}",
                    defects,
                    sampled,
                    *defects as f64 * 100.0 / sampled as f64,
                    category
                ),
            );
        }

        for reference in &self.config.validation.references {
            let orphans = self
                .connector
                .count_orphans(
                    &table,
                    &reference.column,
                    &reference.ref_table,
                    &reference.ref_column,
                )
                .await;
            if orphans > 0 {
                report.push(
                    Severity::Warning,
                    format!(
                        "{} rows in '{}.{}' reference missing '{}.{}'",
                        orphans, table, reference.column, reference.ref_table, reference.ref_column
                    ),
                );
            }
        }

        let mut duplicates = serde_json::Map::new();
        for column in [&columns.title, &columns.slug] {
            let summary = self
                .connector
                .duplicate_values(&table, column, DUPLICATE_EXAMPLES)
                .await;
            if summary.groups > 0 {
                let examples: Vec<String> = summary
                    .examples
                    .iter()
                    .map(|e| format!("'{}' x{}", e.value, e.count))
                    .collect();
                report.push(
                    Severity::Warning,
                    format!(
                        "{} duplicated values in '{}.{}': {}",
                        summary.groups,
                        table,
                        column,
                        examples.join(", ")
                    ),
                );
            }
            duplicates.insert(column.clone(), json!(summary));
        }

        let outcome = outcome_of(&report);
        report.test(
            "integrity",
            outcome,
            format!("Sampled {} of {} rows", sampled, total),
            json!({ "sampled": sampled, "total": total, "defects": rates, "duplicates": duplicates }),
        );
        report.finalize();
        report
    }

    /// Row volume and index coverage.
    pub async fn validate_performance(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let table = self.connector.table().to_string();
        let columns = self.connector.columns().clone();

        let total = self.connector.count_rows(&table).await;
        if total > BATCH_RECOMMENDATION_ROWS {
            report.recommendations.push(format!(
                "'{}' has {} rows: run the migration in batches",
                table, total
            ));
        }
        if total > SMALL_BATCH_RECOMMENDATION_ROWS {
            report.recommendations.push(format!(
                "'{}' has more than {} rows: use a smaller batch size (25 or less) with a batch delay",
                table, SMALL_BATCH_RECOMMENDATION_ROWS
            ));
        }

        let indexes = self.connector.indexes(&table).await;
        let leads_with = |column: &str| {
            indexes
                .iter()
                .any(|i| i.columns.first().map(String::as_str) == Some(column))
        };

        if !leads_with(&columns.id) {
            report.push(
                Severity::Warning,
                format!("No index on primary key column '{}.{}'", table, columns.id),
            );
        }

        let table_columns = self.connector.introspect(&table).await;
        if table_columns.iter().any(|c| c.name == columns.status) && !leads_with(&columns.status)
        {
            report.push(
                Severity::Warning,
                format!("No index on status column '{}.{}'", table, columns.status),
            );
        }

        let outcome = outcome_of(&report);
        report.test(
            "performance",
            outcome,
            format!("{} rows, {} indexes", total, indexes.len()),
            json!({ "rows": total, "indexes": indexes.len() }),
        );
        report.finalize();
        report
    }

    /// Run every check. Connectivity failure skips the rest.
    pub async fn validate_legacy_database(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        let connection = self.connector.test_connection().await;
        if !connection.is_success() {
            report.push(
                Severity::Error,
                format!("Cannot connect to legacy database: {}", connection.message),
            );
            report.test(
                "connection",
                TestOutcome::Failed,
                connection.message.clone(),
                json!(connection),
            );
            for name in ["structure", "integrity", "performance"] {
                report.test(name, TestOutcome::Skipped, "skipped: no connection", Value::Null);
            }
            report.finalize();
            warn!("Legacy validation aborted: {}", connection.message);
            return report;
        }

        report.push(
            Severity::Notice,
            format!(
                "Connected to '{}' ({} tables) in {}ms",
                connection.database, connection.table_count, connection.latency_ms
            ),
        );
        report.test(
            "connection",
            TestOutcome::Passed,
            connection.message.clone(),
            json!(connection),
        );

        report.merge(self.validate_structure().await);
        report.merge(self.validate_integrity().await);
        report.merge(self.validate_performance().await);
        report.validated_at = Utc::now();

        info!(
            "Legacy validation finished: {:?} ({} errors, {} warnings)",
            report.status,
            report.errors.len(),
            report.warnings.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LegacyColumns, ReferenceCheck};
    use crate::legacy::{IndexInfo, LegacyRecord, MemoryConnector};
    use serde_json::Map;

    const MINIMAL: &str = r#"
source:
  host: legacy
  database: legacy_cms
  user: reader
target:
  host: localhost
  database: cms
  user: cms
"#;

    fn article(id: i64, title: &str, content: &str, created: &str) -> LegacyRecord {
        let mut fields = Map::new();
        fields.insert("title".into(), json!(title));
        fields.insert("content".into(), json!(content));
        fields.insert("slug".into(), json!(format!("slug-{}", id)));
        fields.insert("status".into(), json!("published"));
        fields.insert("category".into(), json!("news"));
        fields.insert("created_at".into(), json!(created));
        fields.insert("updated_at".into(), json!(created));
        LegacyRecord::new(id, fields)
    }

    /// 100 rows, the first `missing_titles` without a title.
    fn connector_with_missing_titles(missing_titles: i64) -> Arc<MemoryConnector> {
        let records = (1..=100).map(|id| {
            let title = if id <= missing_titles {
                String::new()
            } else {
                format!("Title {}", id)
            };
            article(id, &title, "body", "2020-01-01 00:00:00")
        });
        Arc::new(MemoryConnector::with_records(
            "articles",
            LegacyColumns::default(),
            records,
        ))
    }

    fn validator(connector: Arc<MemoryConnector>) -> Validator {
        Validator::new(connector, Config::from_yaml(MINIMAL).unwrap())
    }

    #[test]
    fn test_classify_rate_boundaries() {
        assert_eq!(classify_rate(4, 100), Severity::Notice);
        assert_eq!(classify_rate(5, 100), Severity::Warning);
        assert_eq!(classify_rate(10, 100), Severity::Warning);
        assert_eq!(classify_rate(11, 100), Severity::Error);
        assert_eq!(classify_rate(1, 20), Severity::Warning);
        assert_eq!(classify_rate(0, 0), Severity::Notice);
    }

    #[tokio::test]
    async fn test_integrity_thresholds() {
        for (missing, expected) in [
            (4, ReportStatus::Success),
            (5, ReportStatus::Warning),
            (10, ReportStatus::Warning),
            (11, ReportStatus::Error),
        ] {
            let report = validator(connector_with_missing_titles(missing))
                .validate_integrity()
                .await;
            assert_eq!(report.status, expected, "{} missing titles", missing);
            if missing == 4 {
                assert!(report.notices.iter().any(|n| n.contains("missing title")));
            }
        }
    }

    #[tokio::test]
    async fn test_integrity_flags_orphans_and_duplicates() {
        let connector = connector_with_missing_titles(0);
        let mut dup = article(101, "Title 2", "body", "2020-01-01 00:00:00");
        dup.fields.insert("author_id".into(), json!(7));
        connector.insert(dup);
        connector.insert_into("authors", LegacyRecord::new(1, Map::new()));

        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.validation.references.push(ReferenceCheck {
            column: "author_id".into(),
            ref_table: "authors".into(),
            ref_column: "id".into(),
        });
        let report = Validator::new(connector, config).validate_integrity().await;

        assert_eq!(report.status, ReportStatus::Warning);
        assert!(report.warnings.iter().any(|w| w.contains("reference missing 'authors.id'")));
        assert!(report.warnings.iter().any(|w| w.contains("'Title 2' x2")));
    }

    #[tokio::test]
    async fn test_structure_missing_required_column_is_error() {
        let connector = Arc::new(MemoryConnector::with_records(
            "articles",
            LegacyColumns::default(),
            vec![LegacyRecord::new(1, {
                let mut f = Map::new();
                f.insert("title".into(), json!("only a title"));
                f
            })],
        ));
        let report = validator(connector).validate_structure().await;
        assert_eq!(report.status, ReportStatus::Error);
        assert!(report.errors.iter().any(|e| e.contains("'articles.content'")));
        assert!(report.warnings.iter().any(|w| w.contains("'articles.slug'")));
    }

    #[tokio::test]
    async fn test_structure_missing_table_is_error() {
        let connector = connector_with_missing_titles(0);
        connector.drop_table("articles");
        let report = validator(connector).validate_structure().await;
        assert_eq!(report.status, ReportStatus::Error);
        assert!(report.errors[0].contains("Required table 'articles' not found"));
    }

    #[tokio::test]
    async fn test_performance_recommendations_and_indexes() {
        let connector = connector_with_missing_titles(0);
        connector.define_table(
            "articles",
            Vec::new(),
            vec![IndexInfo {
                name: "PRIMARY".into(),
                columns: vec!["id".into()],
                unique: true,
                primary: true,
            }],
        );
        let report = validator(connector).validate_performance().await;
        assert_eq!(report.status, ReportStatus::Warning);
        assert!(report.recommendations.is_empty());
        assert!(report.warnings[0].contains("status column"));
    }

    #[tokio::test]
    async fn test_connection_failure_skips_other_checks() {
        let connector = connector_with_missing_titles(0);
        connector.set_reachable(false);
        let report = validator(connector).validate_legacy_database().await;
        assert_eq!(report.status, ReportStatus::Error);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.tests.len(), 4);
        assert!(report.tests[1..]
            .iter()
            .all(|t| t.outcome == TestOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_full_report_on_clean_data() {
        let report = validator(connector_with_missing_titles(0))
            .validate_legacy_database()
            .await;
        // The in-memory table has no status index.
        assert_eq!(report.status, ReportStatus::Warning);
        assert!(report.errors.is_empty());
        let names: Vec<&str> = report.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["connection", "structure", "integrity", "performance"]);
        assert!(report.to_json().contains("\"status\": \"warning\""));
    }
}
