//! End-to-end CLI tests for the ripper binary.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn ripper() -> Command {
    Command::cargo_bin("ripper").unwrap()
}

/// No input is not an error.
#[test]
fn test_binary_invocation_without_input_returns_zero() {
    ripper().env("NO_COLOR", "1").assert().success();
}

#[test]
fn test_binary_help_displays_usage() {
    ripper()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--format"))
        .stdout(predicate::str::contains("--verify"));
}

#[test]
fn test_binary_version_displays_version() {
    ripper()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ripper"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    ripper()
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_threads_out_of_range_rejected() {
    ripper()
        .args(["--threads", "64", "https://example.com/a.html"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("between 1 and 32"));
}

#[test]
fn test_binary_comment_only_input_file_returns_zero() {
    let dir = TempDir::new().unwrap();
    let list = dir.path().join("urls.txt");
    fs::write(&list, "# nothing yet\n\n").unwrap();
    ripper().arg("--txt").arg(&list).assert().success();
}

#[test]
fn test_binary_missing_input_file_returns_one() {
    let dir = TempDir::new().unwrap();
    ripper()
        .arg("--txt")
        .arg(dir.path().join("absent.txt"))
        .assert()
        .code(1);
}

// ==================== Verify Tests ====================

#[test]
fn test_binary_verify_empty_dir_returns_zero() {
    let dir = TempDir::new().unwrap();
    ripper()
        .arg("--verify")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Checked 0 metadata file(s)"));
}

#[test]
fn test_binary_verify_missing_dir_returns_one() {
    let dir = TempDir::new().unwrap();
    ripper()
        .arg("--verify")
        .arg(dir.path().join("nope"))
        .assert()
        .code(1);
}

#[test]
fn test_binary_verify_reports_missing_file() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("Dumas - Livre");
    fs::create_dir_all(&book).unwrap();
    let metadata = serde_json::json!({
        "tool": "ripper",
        "version": "0.1.0",
        "source_url": "https://example.com/livre.html",
        "metadata": {},
        "download_links": [],
        "tracks": [],
        "children": [],
        "downloaded_files": ["livre.zip"]
    });
    fs::write(book.join("Dumas - Livre.json"), metadata.to_string()).unwrap();

    ripper()
        .arg("--verify")
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("missing:"))
        .stdout(predicate::str::contains("livre.zip"));
}
