//! CLI integration tests for content-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! exit codes for configuration errors, and the job commands that work
//! against a file-backed job store without any database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// Get a command for the content-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("content-migrate").unwrap()
}

/// Write a config that keeps jobs as files under `state_dir`.
fn file_backend_config(dir: &TempDir, state_dir: &Path) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        "source:
  host: 127.0.0.1
  database: legacy_cms
  user: reader
target:
  host: 127.0.0.1
  database: cms
  user: cms
progress:
  backend: file
  state_dir: {}",
        state_dir.display()
    )
    .unwrap();
    path
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("jobs"))
        .stdout(predicate::str::contains("cancel"))
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("init-schema"));
}

#[test]
fn test_migrate_subcommand_help() {
    cmd()
        .args(["migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--validate-first"))
        .stdout(predicate::str::contains("--max-articles"))
        .stdout(predicate::str::contains("--resume-from-id"))
        .stdout(predicate::str::contains("--job-id"))
        .stdout(predicate::str::contains("--show-progress"))
        .stdout(predicate::str::contains("--date-from"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("content-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

// =============================================================================
// Exit Code Tests - Config Errors
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_required_fields_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  type: mysql").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_wrong_source_type_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "source:
  type: mssql
  host: legacy-db
  database: legacy_cms
  user: reader
target:
  host: localhost
  database: cms
  user: cms"
    )
    .unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("source.type must be 'mysql'"));
}

#[test]
fn test_invalid_date_filter_is_rejected() {
    cmd()
        .args(["migrate", "--date-from", "yesterday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--date-from"));
}

// =============================================================================
// Job Commands Against a File Store
// =============================================================================

#[test]
fn test_jobs_with_no_active_jobs() {
    let dir = TempDir::new().unwrap();
    let config = file_backend_config(&dir, &dir.path().join("jobs"));

    cmd()
        .args(["--config", config.to_str().unwrap(), "jobs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No active jobs"));
}

#[test]
fn test_jobs_history_json_is_empty_array() {
    let dir = TempDir::new().unwrap();
    let config = file_backend_config(&dir, &dir.path().join("jobs"));

    cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "--output-json",
            "jobs",
            "--history",
            "5",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_status_of_unknown_job_exits_with_code_5() {
    let dir = TempDir::new().unwrap();
    let config = file_backend_config(&dir, &dir.path().join("jobs"));

    cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "status",
            "--job-id",
            "no-such-job",
        ])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("no-such-job"));
}

#[test]
fn test_cancel_of_unknown_job_exits_with_code_5() {
    let dir = TempDir::new().unwrap();
    let config = file_backend_config(&dir, &dir.path().join("jobs"));

    cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "cancel",
            "--job-id",
            "no-such-job",
        ])
        .assert()
        .code(5);
}

// =============================================================================
// No Subcommand Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
