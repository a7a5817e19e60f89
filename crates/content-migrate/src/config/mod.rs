//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration for resume validation.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Tables that must exist in the legacy database.
    pub fn required_tables(&self) -> Vec<String> {
        if self.validation.required_tables.is_empty() {
            vec![self.source.table.clone()]
        } else {
            self.validation.required_tables.clone()
        }
    }

    /// Columns that must exist in the legacy table.
    pub fn required_columns(&self) -> Vec<String> {
        if self.validation.required_columns.is_empty() {
            let c = &self.source.columns;
            vec![c.id.clone(), c.title.clone(), c.content.clone()]
        } else {
            self.validation.required_columns.clone()
        }
    }

    /// Columns whose absence is tolerated.
    pub fn optional_columns(&self) -> Vec<String> {
        if self.validation.optional_columns.is_empty() {
            let c = &self.source.columns;
            vec![
                c.slug.clone(),
                c.status.clone(),
                c.category.clone(),
                c.created_at.clone(),
                c.updated_at.clone(),
            ]
        } else {
            self.validation.optional_columns.clone()
        }
    }

    /// Expected type family per legacy column.
    pub fn column_types(&self) -> std::collections::BTreeMap<String, String> {
        if !self.validation.column_types.is_empty() {
            return self.validation.column_types.clone();
        }
        let c = &self.source.columns;
        [
            (c.id.clone(), "integer"),
            (c.title.clone(), "string"),
            (c.content.clone(), "string"),
            (c.created_at.clone(), "datetime"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }
}

impl SourceConfig {
    /// Build a connection URL for sqlx (password omitted).
    pub fn display_url(&self) -> String {
        format!(
            "mysql://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

impl TargetConfig {
    /// Build a connection string for tokio-postgres.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.database, self.user, self.password
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source:
  host: legacy-db
  database: legacy_cms
  user: reader
  password: secret
target:
  host: localhost
  database: cms
  user: cms
"#;

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.source.table, "articles");
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.migration.batch_size, 50);
        assert_eq!(config.migration.content_type, "article");
        assert_eq!(config.progress.log_window, 100);
        assert_eq!(config.transform.status_map.get("1").unwrap(), "published");
        assert_eq!(config.validation.get_sample_size(), 100);
    }

    #[test]
    fn test_default_field_mappings_follow_columns() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.source.columns.title = "headline".into();
        let mappings = config
            .migration
            .effective_field_mappings(&config.source.columns);
        let title = mappings.iter().find(|m| m.target == "title").unwrap();
        assert_eq!(title.source, "headline");
    }

    #[test]
    fn test_hash_changes_with_config() {
        let a = Config::from_yaml(MINIMAL).unwrap();
        let mut b = a.clone();
        assert_eq!(a.hash(), b.hash());
        b.migration.batch_size = 10;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_required_columns_default() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.required_columns(), vec!["id", "title", "content"]);
        assert_eq!(config.required_tables(), vec!["articles"]);
    }

    #[test]
    fn test_field_mapping_with_directive() {
        let yaml = format!(
            "{}migration:\n  field_mappings:\n    - target: price\n      source: cost_text\n      transform: price\n",
            MINIMAL
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(
            config.migration.field_mappings[0].transform,
            Some(crate::transform::TransformKind::Price)
        );
    }
}
