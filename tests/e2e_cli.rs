//! CLI end-to-end tests
//!
//! Tests for the bookforged command-line interface. None of these reach a
//! real provider: they either stop before resolution or use inputs the
//! resolver rejects up front.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the bookforged binary
#[allow(deprecated)]
fn bookforged_cmd() -> Command {
    Command::cargo_bin("bookforged").unwrap()
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    fs::write(&path, body).unwrap();
    path
}

const MEMORY_CONFIG: &str = r#"
[store]
backend = "memory"

[[providers]]
name = "open_library"
min_interval_ms = 0
"#;

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = bookforged_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = bookforged_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bookforged"))
        .stdout(predicate::str::contains("resolve-isbn"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_flag() {
    let mut cmd = bookforged_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bookforged"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = bookforged_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_resolve_isbn_requires_title() {
    let mut cmd = bookforged_cmd();
    cmd.arg("resolve-isbn")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--title"));
}

#[test]
fn test_cli_batch_requires_isbns() {
    let mut cmd = bookforged_cmd();
    cmd.arg("batch").assert().failure();
}

#[test]
fn test_cli_validate_defaults() {
    let temp = tempdir().unwrap();
    let mut cmd = bookforged_cmd();
    cmd.current_dir(temp.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("open_library"));
}

#[test]
fn test_cli_validate_config_file() {
    let temp = tempdir().unwrap();
    let config_file = write_config(temp.path(), MEMORY_CONFIG);

    let mut cmd = bookforged_cmd();
    cmd.args(["validate", config_file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Providers: 1"))
        .stdout(predicate::str::contains("open_library (enabled)"));
}

#[test]
fn test_cli_validate_rejects_duplicate_providers() {
    let temp = tempdir().unwrap();
    let config_file = write_config(
        temp.path(),
        r#"
[[providers]]
name = "isbndb"

[[providers]]
name = "isbndb"
"#,
    );

    let mut cmd = bookforged_cmd();
    cmd.args(["validate", config_file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("more than once"));
}

#[test]
fn test_cli_validate_rejects_unknown_provider() {
    let temp = tempdir().unwrap();
    let config_file = write_config(
        temp.path(),
        r#"
[[providers]]
name = "goodreads"
"#,
    );

    let mut cmd = bookforged_cmd();
    cmd.args(["validate", config_file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn test_cli_metadata_invalid_isbn_reports_not_found() {
    let temp = tempdir().unwrap();
    let config_file = write_config(temp.path(), MEMORY_CONFIG);

    let mut cmd = bookforged_cmd();
    cmd.args([
        "--config",
        config_file.to_str().unwrap(),
        "metadata",
        "not-an-isbn",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("No metadata found"));
}

#[test]
fn test_cli_metadata_trace_rejects_invalid_isbn() {
    let temp = tempdir().unwrap();
    let config_file = write_config(temp.path(), MEMORY_CONFIG);

    let mut cmd = bookforged_cmd();
    cmd.args([
        "--config",
        config_file.to_str().unwrap(),
        "metadata",
        "--trace",
        "12345",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid ISBN"));
}

#[test]
fn test_cli_quota_without_metered_providers() {
    let temp = tempdir().unwrap();
    let config_file = write_config(temp.path(), MEMORY_CONFIG);

    let mut cmd = bookforged_cmd();
    cmd.args(["--config", config_file.to_str().unwrap(), "quota"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No metered providers"));
}

#[test]
fn test_cli_quota_reports_fresh_window() {
    let temp = tempdir().unwrap();
    let config_file = write_config(
        temp.path(),
        r#"
[store]
backend = "memory"

[[providers]]
name = "isbndb"
daily_limit = 250
"#,
    );

    let mut cmd = bookforged_cmd();
    cmd.args(["--config", config_file.to_str().unwrap(), "quota"])
        .assert()
        .success()
        .stdout(predicate::str::contains("isbndb: 0/250 used"));
}
