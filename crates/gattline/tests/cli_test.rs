//! Integration tests for the `gattline` CLI binary.
//!
//! These cover argument parsing, help output, shell completions, config
//! handling and error exit codes, all without touching a Bluetooth adapter.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command for the `gattline` binary with env isolation.
///
/// Clears all `GATTLINE_*` variables and points the config file into
/// `dir`, so tests never touch the user's real configuration.
fn gattline_cmd(dir: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("gattline");
    cmd.env("GATTLINE_CONFIG", dir.join("config.toml"))
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir)
        .env("NO_COLOR", "1")
        .env_remove("GATTLINE_PROFILE")
        .env_remove("GATTLINE_PEER")
        .env_remove("GATTLINE_ADAPTER")
        .env_remove("GATTLINE_TIMEOUT")
        .env_remove("GATTLINE_OUTPUT")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let dir = tempfile::tempdir().unwrap();
    let output = gattline_cmd(dir.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("scan")
            .and(predicate::str::contains("services"))
            .and(predicate::str::contains("read"))
            .and(predicate::str::contains("write"))
            .and(predicate::str::contains("listen")),
    );
}

#[test]
fn test_version_flag() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("gattline"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_zsh() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_completions_bash() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_env() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_show_without_file() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[defaults]"));
}

#[test]
fn test_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .args(["config", "init", "--name", "strap", "--peer", "C4:7C:8D:6A:11:02"])
        .assert()
        .success();
    assert!(dir.path().join("config.toml").exists());

    gattline_cmd(dir.path())
        .args(["--output", "json", "config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"default_profile\": \"strap\"")
                .and(predicate::str::contains("C4:7C:8D:6A:11:02")),
        );
}

#[test]
fn test_config_init_refuses_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path()).args(["config", "init"]).assert().success();
    gattline_cmd(dir.path())
        .args(["config", "init"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--force"));
    gattline_cmd(dir.path())
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let dir = tempfile::tempdir().unwrap();
    let output = gattline_cmd(dir.path()).arg("foobar").output().unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("foobar"));
}

#[test]
fn test_invalid_output_format() {
    let dir = tempfile::tempdir().unwrap();
    let output = gattline_cmd(dir.path())
        .args(["--output", "xml", "config", "show"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("possible values") || text.contains("invalid"));
}

#[test]
fn test_read_without_peer() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .args(["read", "180f", "2a19"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No peer specified"));
}

#[test]
fn test_unknown_profile() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .args(["--profile", "lab", "read", "180f", "2a19"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("lab"));
}

#[test]
fn test_write_rejects_bad_hex_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .args(["--peer", "C4:7C:8D:6A:11:02", "write", "180d", "2a39", "0g"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("value"));
}

#[test]
fn test_read_rejects_bad_uuid() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .args(["--peer", "C4:7C:8D:6A:11:02", "read", "battery", "2a19"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("collection"));
}

#[test]
fn test_chunk_conflicts_with_instance() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .args(["write", "180d", "2a39", "0102", "--chunk", "1", "--instance", "1"])
        .assert()
        .code(2);
}

// ── Subcommand help discovery ───────────────────────────────────────

#[test]
fn test_config_subcommands_exist() {
    let dir = tempfile::tempdir().unwrap();
    gattline_cmd(dir.path())
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("show")
                .and(predicate::str::contains("path"))
                .and(predicate::str::contains("init")),
        );
}
