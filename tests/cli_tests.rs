//! Integration tests for the CLI interface
//!
//! Tests argument parsing and the commands that need no network

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn fibrant() -> Command {
    let mut cmd = Command::cargo_bin("fibrant").unwrap();
    cmd.env_remove("FIBRANT_API_URL")
        .env_remove("FIBRANT_PARALLELISM")
        .env_remove("FIBRANT_LOG_LEVEL");
    cmd
}

#[test]
fn test_cli_help_flag() {
    fibrant()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_list_help_mentions_deadline() {
    fibrant()
        .args(["list", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--deadline"))
        .stdout(predicate::str::contains("--parallelism"));
}

#[test]
fn test_config_prints_effective_toml() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[api]
base_url = "http://localhost:4000"

[fetch]
parallelism = 4
"#
    )
    .unwrap();

    fibrant()
        .arg("config")
        .arg("--config")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("base_url = \"http://localhost:4000\""))
        .stdout(predicate::str::contains("parallelism = 4"));
}

#[test]
fn test_env_overrides_config_file() {
    let file = NamedTempFile::new().unwrap();

    fibrant()
        .env("FIBRANT_PARALLELISM", "unbounded")
        .arg("config")
        .arg("--config")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("parallelism = \"unbounded\""));
}

#[test]
fn test_missing_config_file_fails() {
    fibrant()
        .args(["config", "--config", "/definitely/not/here.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_invalid_parallelism_rejected() {
    fibrant()
        .args(["list", "--parallelism", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parallelism"));
}

#[test]
fn test_invalid_deadline_rejected() {
    fibrant()
        .args(["list", "--deadline", "soon"])
        .assert()
        .failure();
}
