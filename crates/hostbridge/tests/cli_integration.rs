//! CLI integration tests for the hostbridge command-line interface.
//!
//! These tests verify:
//! - Help text is displayed correctly
//! - Config subcommands honour --config-dir
//! - `call` fails cleanly on bad input or an unreachable host
//!
//! None of them need a running host.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the hostbridge binary with an isolated config dir.
fn hostbridge(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("hostbridge").unwrap();
    cmd.env("HOSTBRIDGE_CONFIG_DIR", config_dir.path())
        .env_remove("HOSTBRIDGE_URL")
        .env_remove("HOSTBRIDGE_HOST")
        .env_remove("HOSTBRIDGE_PORT")
        .env_remove("HOSTBRIDGE_REQUEST_TIMEOUT")
        .env_remove("HOSTBRIDGE_CLIENT_NAME");
    cmd
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    hostbridge(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("call"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_displays() {
    let dir = TempDir::new().unwrap();
    hostbridge(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hostbridge"));
}

#[test]
fn test_call_help() {
    let dir = TempDir::new().unwrap();
    hostbridge(&dir)
        .args(["call", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--params"))
        .stdout(predicate::str::contains("--timeout"));
}

#[test]
fn test_serve_help() {
    let dir = TempDir::new().unwrap();
    hostbridge(&dir)
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--port"));
}

#[test]
fn test_call_requires_method() {
    let dir = TempDir::new().unwrap();
    hostbridge(&dir).arg("call").assert().failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_path_uses_config_dir() {
    let dir = TempDir::new().unwrap();
    let expected = dir.path().join("config.toml");
    hostbridge(&dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(expected.display().to_string()));
}

#[test]
fn test_config_init_then_show() {
    let dir = TempDir::new().unwrap();
    hostbridge(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config file"));
    assert!(dir.path().join("config.toml").is_file());

    hostbridge(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));

    hostbridge(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ loaded"))
        .stdout(predicate::str::contains("request_timeout_secs = 10"));
}

#[test]
fn test_config_show_applies_timeout_env() {
    let dir = TempDir::new().unwrap();
    hostbridge(&dir)
        .env("HOSTBRIDGE_REQUEST_TIMEOUT", "30")
        .args(["--json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"request_timeout_secs\": 30"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Call Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_call_rejects_non_object_params() {
    let dir = TempDir::new().unwrap();
    hostbridge(&dir)
        .args(["call", "echo", "--params", "[1, 2]"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON object"));
}

#[test]
fn test_call_unreachable_host() {
    let dir = TempDir::new().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    hostbridge(&dir)
        .args(["--json", "call", "echo", "--url"])
        .arg(format!("ws://{}/bridge", addr))
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"type\": \"connection\""));
}
