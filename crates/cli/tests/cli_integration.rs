//! CLI integration tests for the non-server subcommands.
//!
//! Uses `assert_cmd` to spawn the `coa` binary and verify exit codes,
//! stdout content, and stderr content.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Helper: a `coa` command with COA_* overrides cleared.
fn coa() -> Command {
    let mut cmd = cargo_bin_cmd!("coa");
    for key in ["COA_PORT", "COA_API_KEY", "COA_BASE_URL", "COA_RATE_LIMIT", "COA_MAIL_API_KEY"] {
        cmd.env_remove(key);
    }
    cmd
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    coa()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Certificate of analysis workflow server",
        ));
}

#[test]
fn version_exits_0() {
    coa()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("coa"));
}

// ──────────────────────────────────────────────
// 2. resolve
// ──────────────────────────────────────────────

#[test]
fn resolve_ignores_stored_status() {
    coa()
        .arg("resolve")
        .arg(fixture("record_pending_g2.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("R-400: pending_g2 (stage G2)"));
}

#[test]
fn resolve_reports_pending_for_user() {
    coa()
        .arg("resolve")
        .arg(fixture("record_pending_g2.json"))
        .args(["--user", "alice", "--machines", "G1,G3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending for alice: G3"));
}

#[test]
fn resolve_json_output() {
    let output = coa()
        .args(["--output", "json", "resolve"])
        .arg(fixture("record_pending_g2.json"))
        .args(["--user", "carol"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["referenceNo"], "R-400");
    assert_eq!(value["status"], "pending_g2");
    assert_eq!(value["stage"], "G2");
    assert_eq!(value["onHold"], false);
    assert_eq!(value["pendingMachines"], serde_json::json!(["G1", "G2", "G3"]));
}

#[test]
fn resolve_hold_wins() {
    coa()
        .arg("resolve")
        .arg(fixture("record_on_hold.json"))
        .args(["--user", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("R-500: hold (stage HOLD)"))
        .stdout(predicate::str::contains("on hold by carol: sample contaminated"))
        .stdout(predicate::str::contains("nothing pending for alice"));
}

#[test]
fn resolve_missing_file_exits_1() {
    coa()
        .args(["resolve", "does/not/exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("record file not found"));
}

#[test]
fn resolve_unknown_machine_exits_1() {
    coa()
        .arg("resolve")
        .arg(fixture("record_pending_g2.json"))
        .args(["--user", "alice", "--machines", "G1,G4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown machine 'G4'"));
}

#[test]
fn resolve_invalid_json_is_reported_as_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();

    let output = coa()
        .args(["--output", "json", "resolve"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let err: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert!(err["error"]
        .as_str()
        .unwrap()
        .contains("invalid test record"));
}

#[test]
fn resolve_quiet_suppresses_errors() {
    coa()
        .args(["--quiet", "resolve", "does/not/exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::is_empty());
}

// ──────────────────────────────────────────────
// 3. config
// ──────────────────────────────────────────────

#[test]
fn config_masks_secrets_and_applies_env() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coa.toml");
    fs::write(
        &path,
        "[server]\nport = 9000\napi_key = \"file-secret\"\n\n[approval]\ntoken_ttl_hours = 48\n",
    )
    .unwrap();

    let output = coa()
        .args(["--output", "json", "config", "--config"])
        .arg(&path)
        .env("COA_PORT", "9100")
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["server"]["port"], 9100);
    assert_eq!(value["server"]["api_key"], "********");
    assert_eq!(value["approval"]["token_ttl_hours"], 48);
    assert!(!String::from_utf8_lossy(&output.stdout).contains("file-secret"));
}

#[test]
fn config_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coa.toml");
    fs::write(&path, "[approval]\ntoken_ttl_hours = 0\n").unwrap();

    coa()
        .args(["config", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("token_ttl_hours must be positive"));
}

#[test]
fn serve_rejects_missing_config_file() {
    coa()
        .args(["serve", "--config", "does/not/exist.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config"));
}
