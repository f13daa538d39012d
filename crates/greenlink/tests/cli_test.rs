//! Integration tests for the `greenlink` CLI binary.
//!
//! These tests cover argument parsing, shell completions, the config
//! subcommands and trace replay, all against temporary files.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `greenlink` binary with env isolation.
///
/// Clears `GREENLINK_*` overrides and points the config file at `config`
/// so tests never touch the user's real configuration.
fn greenlink_cmd(config: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("greenlink");
    cmd.env("HOME", "/tmp/greenlink-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/greenlink-cli-test-nonexistent")
        .env("GREENLINK_CONFIG", config)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("GREENLINK_API__TOKEN")
        .env_remove("GREENLINK_REALTIME__GLOBAL_TOPIC");
    cmd
}

fn write_trace(dir: &tempfile::TempDir, lines: &[&str]) -> PathBuf {
    let path = dir.path().join("trace.jsonl");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

const STALE_TRACE: &[&str] = &[
    "# one dashboard watching zone 7",
    r#"{"op":"subscribe","owner":"dashboard","zone":7}"#,
    r#"{"op":"connect"}"#,
    r#"{"op":"snapshot","zone":7,"server_ts":100,"state":{"ph":6.0}}"#,
    r#"{"op":"emit","zone":7,"event":"CommandStatusUpdated","data":{"server_ts":90}}"#,
    r#"{"op":"emit","zone":7,"event":"CommandStatusUpdated","data":{"server_ts":110}}"#,
    r#"{"op":"emit","zone":7,"event":"CommandStatusUpdated","data":{"server_ts":105}}"#,
];

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let dir = tempfile::tempdir().unwrap();
    let output = greenlink_cmd(&dir.path().join("config.toml"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    greenlink_cmd(&dir.path().join("config.toml"))
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("replay")
                .and(predicate::str::contains("config"))
                .and(predicate::str::contains("completions")),
        );
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    let dir = tempfile::tempdir().unwrap();
    greenlink_cmd(&dir.path().join("config.toml"))
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("greenlink"));
}

#[test]
fn test_completions_invalid_shell() {
    let dir = tempfile::tempdir().unwrap();
    greenlink_cmd(&dir.path().join("config.toml"))
        .args(["completions", "tcsh"])
        .assert()
        .failure()
        .code(2);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_override() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("custom.toml");
    greenlink_cmd(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("greenlink").join("config.toml");

    greenlink_cmd(&config)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(config.exists());

    greenlink_cmd(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[realtime]")
                .and(predicate::str::contains("resubscribe_debounce = \"250ms\""))
                .and(predicate::str::contains("global_topic = \"events.global\"")),
        );
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[realtime]\n").unwrap();

    greenlink_cmd(&config)
        .args(["config", "init"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--force"));

    greenlink_cmd(&config)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_config_show_masks_token() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        "[api]\nbase_url = \"https://greenhouse.local\"\ntoken = \"very-secret\"\n",
    )
    .unwrap();

    greenlink_cmd(&config)
        .args(["config", "show", "--output", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("very-secret").not())
        .stdout(predicate::str::contains("********"));
}

#[test]
fn test_invalid_config_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[realtime]\npending_poll_interval = \"0s\"\n").unwrap();

    greenlink_cmd(&config)
        .args(["config", "show"])
        .assert()
        .failure()
        .code(3);
}

// ── Replay ──────────────────────────────────────────────────────────

#[test]
fn test_replay_table_summary() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(&dir, STALE_TRACE);

    greenlink_cmd(&dir.path().join("config.toml"))
        .arg("replay")
        .arg(&trace)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("commands.7")
                .and(predicate::str::contains("stale"))
                .and(predicate::str::contains("3 events: 1 delivered, 2 stale")),
        );
}

#[test]
fn test_replay_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(&dir, STALE_TRACE);

    let output = greenlink_cmd(&dir.path().join("config.toml"))
        .args(["replay", "--output", "json"])
        .arg(&trace)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let outcomes: Vec<&str> = report["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["outcome"].as_str().unwrap())
        .collect();
    assert_eq!(outcomes, ["stale", "delivered", "stale"]);
    assert_eq!(report["stats"]["dropped_stale"], 2);
    assert_eq!(report["owners"][0]["owner"], "dashboard");
}

#[test]
fn test_replay_uses_configured_topic_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[realtime]\nzone_topic_prefix = \"zone-cmd\"\n").unwrap();
    let trace = write_trace(&dir, STALE_TRACE);

    greenlink_cmd(&config)
        .arg("replay")
        .arg(&trace)
        .assert()
        .success()
        .stdout(predicate::str::contains("zone-cmd.7"))
        .stdout(predicate::str::contains("1 delivered"));

    greenlink_cmd(&config)
        .args(["replay", "--summary"])
        .arg(&trace)
        .assert()
        .success()
        .stdout(predicate::str::contains("zone-cmd.7").not())
        .stdout(predicate::str::contains("Owner"));
}

#[test]
fn test_replay_reconnect_after_wait() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(
        &dir,
        &[
            r#"{"op":"connect"}"#,
            r#"{"op":"subscribe","owner":"feed"}"#,
            r#"{"op":"disconnect"}"#,
            r#"{"op":"connect"}"#,
            r#"{"op":"wait","ms":400}"#,
            r#"{"op":"emit","event":"AlertRaised","data":{"zone_id":3}}"#,
        ],
    );

    let output = greenlink_cmd(&dir.path().join("config.toml"))
        .args(["replay", "-o", "json-compact"])
        .arg(&trace)
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["events"][0]["outcome"], "delivered");
    assert_eq!(report["stats"]["resubscribe_rounds"], 1);
}

#[test]
fn test_replay_missing_trace() {
    let dir = tempfile::tempdir().unwrap();
    greenlink_cmd(&dir.path().join("config.toml"))
        .args(["replay", "/nonexistent/trace.jsonl"])
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("Could not read trace file"));
}

#[test]
fn test_replay_invalid_line() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(&dir, &[r#"{"op":"connect"}"#, "not json"]);

    greenlink_cmd(&dir.path().join("config.toml"))
        .arg("replay")
        .arg(&trace)
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("line 2"));
}
