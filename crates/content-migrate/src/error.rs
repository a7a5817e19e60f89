//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Legacy source query error
    #[error("Legacy source error: {0}")]
    Source(#[from] sqlx::Error),

    /// Destination database query error
    #[error("Destination database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Pre-flight connectivity check failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Pre-flight validation reported blocking errors
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Job-level failure that escaped per-row isolation
    #[error("Job {job_id} failed: {message}")]
    Job { job_id: String, message: String },

    /// Unknown job id
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Job is not in a state that allows the requested operation
    #[error("Job {job_id} is {status}, expected running")]
    InvalidTransition { job_id: String, status: String },

    /// Config hash mismatch on resume
    #[error("Config has changed since the job started - cannot resume. Use --force to resume anyway.")]
    ConfigChanged,

    /// Durable job record error
    #[error("Job state error: {0}")]
    State(String),

    /// Destination record error (slug collision exhaustion, missing rows, ...)
    #[error("Store error: {0}")]
    Store(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, operator cancel)
    #[error("Migration cancelled")]
    Cancelled,
}

impl From<deadpool_postgres::PoolError> for MigrateError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        MigrateError::pool(e, "acquiring destination connection")
    }
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Job error
    pub fn job(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Job {
            job_id: job_id.into(),
            message: message.into(),
        }
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::ConfigChanged => 1,
            MigrateError::Connection(_)
            | MigrateError::Source(_)
            | MigrateError::Target(_)
            | MigrateError::Pool { .. } => 2,
            MigrateError::Validation(_) => 3,
            MigrateError::Job { .. } | MigrateError::Store(_) => 4,
            MigrateError::State(_)
            | MigrateError::JobNotFound(_)
            | MigrateError::InvalidTransition { .. }
            | MigrateError::Json(_) => 5,
            MigrateError::Cancelled => 6,
            MigrateError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 1);
        assert_eq!(MigrateError::Connection("down".into()).exit_code(), 2);
        assert_eq!(MigrateError::Validation("bad".into()).exit_code(), 3);
        assert_eq!(MigrateError::job("j", "boom").exit_code(), 4);
        assert_eq!(MigrateError::Cancelled.exit_code(), 6);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MigrateError::from(io).exit_code(), 7);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::pool("timeout", "fetching mappings");
        let text = err.format_detailed();
        assert!(text.starts_with("Error: Pool error: timeout"));
        assert!(text.contains("fetching mappings"));
    }
}
