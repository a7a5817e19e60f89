//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

const TYPE_FAMILIES: &[&str] = &["integer", "decimal", "string", "datetime", "boolean"];
const OVERRIDE_TYPES: &[&str] = &["string", "integer", "boolean", "json", "datetime"];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }
    if config.source.r#type != "mysql" {
        return Err(MigrateError::Config(format!(
            "source.type must be 'mysql', got '{}'",
            config.source.r#type
        )));
    }
    if config.source.table.is_empty() {
        return Err(MigrateError::Config("source.table is required".into()));
    }
    if config.source.max_connections == 0 {
        return Err(MigrateError::Config(
            "source.max_connections must be at least 1".into(),
        ));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.r#type != "postgres" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'postgres', got '{}'",
            config.target.r#type
        )));
    }

    // Migration
    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if config.migration.content_type.trim().is_empty() {
        return Err(MigrateError::Config(
            "migration.content_type is required".into(),
        ));
    }
    if config.migration.claim_lease_secs == 0 {
        return Err(MigrateError::Config(
            "migration.claim_lease_secs must be at least 1".into(),
        ));
    }
    for (i, mapping) in config.migration.field_mappings.iter().enumerate() {
        if mapping.target.is_empty() || mapping.source.is_empty() {
            return Err(MigrateError::Config(format!(
                "migration.field_mappings[{}] needs both target and source",
                i
            )));
        }
    }
    for rule in &config.migration.field_overrides {
        if !OVERRIDE_TYPES.contains(&rule.value_type.as_str()) {
            return Err(MigrateError::Config(format!(
                "field override '{}' has unknown value_type '{}'",
                rule.field, rule.value_type
            )));
        }
    }

    // Transform
    if config.transform.tag_delimiter.is_empty() {
        return Err(MigrateError::Config(
            "transform.tag_delimiter must not be empty".into(),
        ));
    }
    if config.transform.title_max_length == 0 {
        return Err(MigrateError::Config(
            "transform.title_max_length must be at least 1".into(),
        ));
    }

    // Validation rules
    for (column, family) in &config.validation.column_types {
        if !TYPE_FAMILIES.contains(&family.as_str()) {
            return Err(MigrateError::Config(format!(
                "validation.column_types.{}: unknown type family '{}'",
                column, family
            )));
        }
    }
    if let Some(0) = config.validation.sample_size {
        return Err(MigrateError::Config(
            "validation.sample_size must be at least 1".into(),
        ));
    }

    // Progress
    if config.progress.log_window == 0 {
        return Err(MigrateError::Config(
            "progress.log_window must be at least 1".into(),
        ));
    }
    if config.progress.state_dir.is_empty() {
        return Err(MigrateError::Config(
            "progress.state_dir must not be empty".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        FieldOverrideRule, MigrationConfig, ProgressConfig, SourceConfig, TargetConfig,
        TransformConfig, ValidationConfig,
    };

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                r#type: "mysql".to_string(),
                host: "legacy".to_string(),
                port: 3306,
                database: "legacy_cms".to_string(),
                user: "reader".to_string(),
                password: "password".to_string(),
                table: "articles".to_string(),
                columns: Default::default(),
                max_connections: 4,
                connect_timeout_secs: 30,
            },
            target: TargetConfig {
                r#type: "postgres".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                database: "cms".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                schema: "public".to_string(),
                max_connections: 4,
            },
            migration: MigrationConfig::default(),
            transform: TransformConfig::default(),
            validation: ValidationConfig::default(),
            progress: ProgressConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_wrong_source_type() {
        let mut config = valid_config();
        config.source.r#type = "postgres".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_wrong_target_type() {
        let mut config = valid_config();
        config.target.r#type = "mysql".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_unknown_type_family_rejected() {
        let mut config = valid_config();
        config
            .validation
            .column_types
            .insert("id".into(), "bigint".into());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_override_type_rejected() {
        let mut config = valid_config();
        config.migration.field_overrides.push(FieldOverrideRule {
            field: "status".into(),
            value_type: "float".into(),
            value: serde_json::json!(1.5),
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_456"));
    }
}
