//! Per-record checks and cleanup applied before transformation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LegacyColumns;
use crate::legacy::LegacyRecord;
use crate::transform::{html, values};

/// Longest title the destination accepts.
pub const MAX_TITLE_LENGTH: usize = 255;

/// Outcome of [`validate_article_for_migration`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleCheck {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

fn is_date_column(name: &str, columns: &LegacyColumns) -> bool {
    name == columns.created_at
        || name == columns.updated_at
        || name.ends_with("_at")
        || name.ends_with("_date")
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Check a legacy row against the destination's minimum requirements.
pub fn validate_article_for_migration(
    record: &LegacyRecord,
    columns: &LegacyColumns,
) -> ArticleCheck {
    let mut check = ArticleCheck::default();

    match record.text(&columns.title) {
        None => check.errors.push("Title is required".to_string()),
        Some(title) if title.chars().count() > MAX_TITLE_LENGTH => check.errors.push(format!(
            "Title is {} characters (max {})",
            title.chars().count(),
            MAX_TITLE_LENGTH
        )),
        Some(_) => {}
    }

    if is_blank(record.get(&columns.content)) {
        check.warnings.push("Content is empty".to_string());
    }

    for (name, value) in &record.fields {
        if !is_date_column(name, columns) || is_blank(Some(value)) {
            continue;
        }
        if values::parse_datetime(value).is_none() {
            check
                .errors
                .push(format!("Invalid date in '{}': {}", name, value));
        }
    }

    if let Some(slug) = record.text(&columns.slug) {
        let valid_charset = slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid_charset {
            check
                .warnings
                .push(format!("Slug '{}' contains characters outside [a-z0-9-]", slug));
        }
    }

    check.valid = check.errors.is_empty();
    check
}

/// Normalize a legacy row: trimmed strings, script/style blocks removed from
/// content, dates as `%Y-%m-%d %H:%M:%S`, slug restricted to `[a-z0-9-]`.
///
/// Unparseable dates are left untouched.
pub fn clean_data_for_migration(record: &LegacyRecord, columns: &LegacyColumns) -> LegacyRecord {
    let mut cleaned = record.clone();

    for (name, value) in cleaned.fields.iter_mut() {
        let Value::String(s) = value else {
            continue;
        };
        let mut text = s.trim().to_string();

        if *name == columns.content {
            text = html::strip_unsafe_blocks(&text).trim().to_string();
        } else if *name == columns.slug {
            text = html::slugify(&text);
        } else if is_date_column(name, columns) && !text.is_empty() {
            if let Some(dt) = values::parse_datetime(&Value::String(text.clone())) {
                text = dt.format("%Y-%m-%d %H:%M:%S").to_string();
            }
        }

        *s = text;
    }

    cleaned
}
