//! CLI integration tests using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use std::process;
use tempfile::TempDir;

/// Creates a temporary Git repository for CLI testing.
fn create_test_repo() -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path();

    let git = |args: &[&str]| {
        let output = process::Command::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .expect("Failed to run git");
        assert!(output.status.success(), "git {:?} failed", args);
    };

    git(&["init"]);
    git(&["config", "user.email", "test@example.com"]);
    git(&["config", "user.name", "Test User"]);
    std::fs::write(path.join("README.md"), "# Test\n").expect("Failed to write file");
    git(&["add", "."]);
    git(&["commit", "-m", "Initial commit"]);

    temp
}

/// A repoql command with clones isolated to `clones` and no inherited
/// repository settings.
fn repoql(clones: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("repoql").unwrap();
    cmd.env("REPOQL_CLONE_DIR", clones.path())
        .env_remove("REPOQL_REPO")
        .env_remove("GITHUB_TOKEN")
        .env_remove("GIT_SSL_NO_VERIFY");
    cmd
}

#[test]
fn test_help() {
    let clones = TempDir::new().unwrap();
    repoql(&clones)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("SQL query engine for Git"))
        .stdout(predicate::str::contains("detect_language"));
}

#[test]
fn test_version() {
    let clones = TempDir::new().unwrap();
    repoql(&clones)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("repoql"));
}

#[test]
fn test_query_execution() {
    let temp = create_test_repo();
    let clones = TempDir::new().unwrap();

    repoql(&clones)
        .args(["--repo", temp.path().to_str().unwrap()])
        .arg("SELECT trim(message) AS summary FROM commits")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initial commit"));
}

#[test]
fn test_repo_from_environment() {
    let temp = create_test_repo();
    let clones = TempDir::new().unwrap();

    repoql(&clones)
        .env("REPOQL_REPO", temp.path())
        .args(["-f", "csv", "SELECT path FROM files"])
        .assert()
        .success()
        .stdout("path\nREADME.md\n");
}

#[test]
fn test_json_output() {
    let temp = create_test_repo();
    let clones = TempDir::new().unwrap();

    repoql(&clones)
        .args(["--repo", temp.path().to_str().unwrap(), "--format", "json"])
        .arg("SELECT path, executable FROM files")
        .assert()
        .success()
        .stdout(predicate::str::contains("["))
        .stdout(predicate::str::contains("\"path\": \"README.md\""));
}

#[test]
fn test_jsonl_output() {
    let temp = create_test_repo();
    let clones = TempDir::new().unwrap();

    repoql(&clones)
        .args(["--repo", temp.path().to_str().unwrap(), "-f", "jsonl"])
        .arg("SELECT path FROM files")
        .assert()
        .success()
        .stdout("{\"path\":\"README.md\"}\n");
}

#[test]
fn test_csv_without_header() {
    let temp = create_test_repo();
    let clones = TempDir::new().unwrap();

    repoql(&clones)
        .args(["--repo", temp.path().to_str().unwrap(), "-f", "csv", "-H"])
        .arg("SELECT path, executable FROM files")
        .assert()
        .success()
        .stdout("README.md,0\n");
}

#[test]
fn test_invalid_sql_fails() {
    let temp = create_test_repo();
    let clones = TempDir::new().unwrap();

    repoql(&clones)
        .args(["--repo", temp.path().to_str().unwrap()])
        .arg("SELEC nothing")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SQL error"));
}

#[test]
fn test_invalid_revision_fails() {
    let temp = create_test_repo();
    let clones = TempDir::new().unwrap();

    repoql(&clones)
        .args(["--repo", temp.path().to_str().unwrap()])
        .arg("SELECT path FROM files WHERE revision = 'missing'")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid revision"));
}

#[test]
fn test_summarize_commits_json() {
    let temp = create_test_repo();
    let clones = TempDir::new().unwrap();

    repoql(&clones)
        .args(["--repo", temp.path().to_str().unwrap()])
        .args(["summarize", "commits", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"commits\": 1"))
        .stdout(predicate::str::contains("\"email\": \"test@example.com\""));
}

#[test]
fn test_summarize_commits_plain_when_piped() {
    let temp = create_test_repo();
    let clones = TempDir::new().unwrap();

    repoql(&clones)
        .args(["--repo", temp.path().to_str().unwrap()])
        .args(["summarize", "commits", "%.md", "-s", "-30 days"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Commits: 1"))
        .stdout(predicate::str::contains("Files: %.md"));
}

#[test]
fn test_summarize_rejects_bad_date() {
    let temp = create_test_repo();
    let clones = TempDir::new().unwrap();

    repoql(&clones)
        .args(["--repo", temp.path().to_str().unwrap()])
        .args(["summarize", "commits", "--start", "someday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid date"));
}
