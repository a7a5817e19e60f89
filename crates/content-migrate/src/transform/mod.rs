//! Field-level cleaning and casting.
//!
//! The [`Transformer`] maps a legacy value to its destination form based on
//! the target field name. Dispatch goes through a closed [`TransformKind`]
//! resolved in this order: a custom handler registered for the field, the
//! explicit directive on the field rule, the built-in name table, and finally
//! [`TransformKind::Default`]. Transforms never fail.

pub mod html;
pub mod values;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{FieldMapping, TransformConfig};
use crate::legacy::LegacyRecord;

/// Transform applied to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Plain text: tags stripped, entities decoded, whitespace collapsed.
    Text,
    /// Rich HTML body cleanup.
    Body,
    Slug,
    /// Delimited list to JSON array.
    List,
    /// Date to RFC 3339.
    Date,
    Status,
    Price,
    Email,
    Url,
    /// Trim strings, pass everything else through.
    Default,
}

impl TransformKind {
    /// Built-in transform for a target field name.
    pub fn for_field(field: &str) -> Self {
        match field {
            "title" | "name" | "meta_title" | "excerpt" | "summary" | "meta_description"
            | "author" | "subtitle" | "caption" => TransformKind::Text,
            "body" | "content" | "description" | "html" => TransformKind::Body,
            "slug" => TransformKind::Slug,
            "tags" | "categories" | "keywords" => TransformKind::List,
            "published_at" | "created_at" | "updated_at" | "date" => TransformKind::Date,
            "status" => TransformKind::Status,
            "price" | "amount" | "cost" => TransformKind::Price,
            "email" => TransformKind::Email,
            "url" | "website" | "link" | "canonical_url" => TransformKind::Url,
            f if f.ends_with("_at") || f.ends_with("_date") => TransformKind::Date,
            _ => TransformKind::Default,
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransformKind::Text => "text",
            TransformKind::Body => "body",
            TransformKind::Slug => "slug",
            TransformKind::List => "list",
            TransformKind::Date => "date",
            TransformKind::Status => "status",
            TransformKind::Price => "price",
            TransformKind::Email => "email",
            TransformKind::Url => "url",
            TransformKind::Default => "default",
        };
        f.write_str(name)
    }
}

/// Per-field options for a single transform call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldRule {
    pub transform: Option<TransformKind>,
    pub max_length: Option<usize>,
}

impl From<&FieldMapping> for FieldRule {
    fn from(mapping: &FieldMapping) -> Self {
        Self {
            transform: mapping.transform,
            max_length: mapping.max_length,
        }
    }
}

/// Names passed to custom handlers.
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    pub target_field: &'a str,
    pub source_field: &'a str,
}

/// Custom transform registered for a target field.
pub type CustomHandler = Arc<dyn Fn(&Value, &FieldContext<'_>) -> Value + Send + Sync>;

/// How a field will be transformed.
#[derive(Clone)]
pub enum Resolved {
    Custom(CustomHandler),
    Kind(TransformKind),
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Custom(_) => f.write_str("Custom"),
            Resolved::Kind(kind) => write!(f, "Kind({})", kind),
        }
    }
}

/// Stateless field transformer.
#[derive(Clone)]
pub struct Transformer {
    config: TransformConfig,
    handlers: HashMap<String, CustomHandler>,
}

impl Transformer {
    pub fn new(config: TransformConfig) -> Self {
        Self {
            config,
            handlers: HashMap::new(),
        }
    }

    /// Register a custom handler for a target field, replacing any previous one.
    pub fn register<F>(&mut self, field: impl Into<String>, handler: F)
    where
        F: Fn(&Value, &FieldContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.handlers.insert(field.into(), Arc::new(handler));
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Resolve the transform for a target field.
    pub fn resolve(&self, target_field: &str, rule: &FieldRule) -> Resolved {
        if let Some(handler) = self.handlers.get(target_field) {
            return Resolved::Custom(Arc::clone(handler));
        }
        Resolved::Kind(
            rule.transform
                .unwrap_or_else(|| TransformKind::for_field(target_field)),
        )
    }

    /// Transform one value for `target_field`.
    pub fn transform(
        &self,
        value: &Value,
        target_field: &str,
        source_field: &str,
        rule: &FieldRule,
    ) -> Value {
        match self.resolve(target_field, rule) {
            Resolved::Custom(handler) => handler(
                value,
                &FieldContext {
                    target_field,
                    source_field,
                },
            ),
            Resolved::Kind(kind) => {
                let max_length = rule.max_length.or_else(|| {
                    (target_field == "title").then_some(self.config.title_max_length)
                });
                self.apply(kind, value, max_length)
            }
        }
    }

    /// Apply a specific transform kind.
    pub fn apply(&self, kind: TransformKind, value: &Value, max_length: Option<usize>) -> Value {
        match kind {
            TransformKind::Text => match values::scalar_text(value) {
                Some(text) => {
                    let plain = html::strip_tags(&text);
                    Value::String(match max_length {
                        Some(max) => html::truncate_chars(&plain, max),
                        None => plain,
                    })
                }
                None => Value::Null,
            },
            TransformKind::Body => match values::scalar_text(value) {
                Some(text) => Value::String(html::clean_body(
                    &text,
                    &self.config.legacy_asset_prefixes,
                    &self.config.media_prefix,
                )),
                None => Value::Null,
            },
            TransformKind::Slug => match values::scalar_text(value) {
                Some(text) => {
                    let slug = html::slugify(&html::strip_tags(&text));
                    Value::String(match max_length {
                        Some(max) => html::truncate_chars(&slug, max)
                            .trim_end_matches('-')
                            .to_string(),
                        None => slug,
                    })
                }
                None => Value::Null,
            },
            TransformKind::List => values::to_list(value, &self.config.tag_delimiter),
            TransformKind::Date => values::to_date(value),
            TransformKind::Status => values::to_status(value, &self.config.status_map),
            TransformKind::Price => values::to_price(value),
            TransformKind::Email => values::to_email(value),
            TransformKind::Url => values::to_url(value),
            TransformKind::Default => match value {
                Value::String(s) => Value::String(s.trim().to_string()),
                other => other.clone(),
            },
        }
    }

    /// Build the destination field set for a legacy record.
    ///
    /// Source columns missing from the record are passed as null so that
    /// transforms with a null fallback (status) still produce a value.
    pub fn transform_record(
        &self,
        record: &LegacyRecord,
        mappings: &[FieldMapping],
    ) -> Map<String, Value> {
        let mut out = Map::new();
        for mapping in mappings {
            let raw = record.get(&mapping.source).unwrap_or(&Value::Null);
            let value = self.transform(raw, &mapping.target, &mapping.source, &FieldRule::from(mapping));
            out.insert(mapping.target.clone(), value);
        }
        out
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(TransformConfig::default())
    }
}
