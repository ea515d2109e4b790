//! Integration tests for the linkwatch binary
//!
//! These tests run the CLI end-to-end against a temporary configuration
//! file. Routes are local so no SSH server is needed.

#![allow(clippy::uninlined_format_args)]

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

/// Helper to run the CLI with given arguments
fn run_cli(args: &[&str], config: Option<&Path>) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_linkwatch"));
    cmd.env_remove("LINKWATCH_CONFIG").env("NO_COLOR", "1");

    if let Some(path) = config {
        cmd.arg("--config").arg(path);
    }

    cmd.args(args).output().expect("Failed to execute CLI")
}

/// Helper to get stdout as string
fn stdout_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Helper to get stderr as string
fn stderr_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Writes a configuration sampling this machine
fn local_config(dir: &TempDir, extra: &str) -> std::path::PathBuf {
    let path = dir.path().join("linkwatch.toml");
    let text = format!(
        r#"
[target]
local = true

[sampling]
interfaces = ["lo"]
classes = ["low-resolution"]
low_resolution_ms = 200

[[sampling.commands]]
class = "low-resolution"
metric = "answer"
command = "echo 42 {{interface}}"

{extra}
"#
    );
    std::fs::write(&path, text).expect("Failed to write config");
    path
}

// ============================================================================
// Help and completions
// ============================================================================

#[test]
fn test_help_lists_subcommands() {
    let output = run_cli(&["--help"], None);
    assert!(output.status.success(), "Help command should succeed");

    let stdout = stdout_str(&output);
    for command in ["check", "sample", "scan", "config", "init", "completions"] {
        assert!(stdout.contains(command), "Help should mention {command}");
    }
}

#[test]
fn test_version() {
    let output = run_cli(&["--version"], None);
    assert!(output.status.success());
    assert!(stdout_str(&output).contains("linkwatch"));
}

#[test]
fn test_completions_bash() {
    let output = run_cli(&["completions", "bash"], None);
    assert!(output.status.success());
    assert!(stdout_str(&output).contains("linkwatch"));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_init_writes_and_refuses_overwrite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("linkwatch.toml");

    let output = run_cli(&["init"], Some(&path));
    assert!(output.status.success(), "stderr: {}", stderr_str(&output));
    assert!(path.exists());

    let output = run_cli(&["init"], Some(&path));
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_str(&output).contains("already exists"));

    let output = run_cli(&["init", "--force"], Some(&path));
    assert!(output.status.success());
}

#[test]
fn test_missing_config_is_general_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    let output = run_cli(&["config"], Some(&path));
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_str(&output).contains("not found"));
}

#[test]
fn test_config_redacts_passwords() {
    let dir = TempDir::new().unwrap();
    let path = local_config(
        &dir,
        r#"
[switch]
[[switch.hops]]
host = "leaf-3"
user = "admin"
password = "hunter2"

[scan]
ports = ["1/1"]
"#,
    );

    let output = run_cli(&["config"], Some(&path));
    assert!(output.status.success(), "stderr: {}", stderr_str(&output));
    let stdout = stdout_str(&output);
    assert!(!stdout.contains("hunter2"));
    assert!(stdout.contains("<redacted>"));
    assert!(stdout.contains("leaf-3"));
}

#[test]
fn test_config_check_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = local_config(
        &dir,
        r#"
[switch]
local = true

[scan]
ports = ["1/1"]
toggle_limit = 0
"#,
    );

    let output = run_cli(&["config", "--check"], Some(&path));
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_str(&output).contains("[scan]"));
}

// ============================================================================
// Commands against the local route
// ============================================================================

#[test]
fn test_check_local_target() {
    let dir = TempDir::new().unwrap();
    let path = local_config(&dir, "");

    let output = run_cli(
        &["check", "--command", "echo linkwatch-ok", "--format", "json"],
        Some(&path),
    );
    assert!(output.status.success(), "stderr: {}", stderr_str(&output));

    let results: serde_json::Value = serde_json::from_str(&stdout_str(&output)).unwrap();
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[0]["details"]["output"], "linkwatch-ok");
}

#[test]
fn test_check_failing_command_exits_with_connection_code() {
    let dir = TempDir::new().unwrap();
    let path = local_config(&dir, "");

    let output = run_cli(&["check", "--command", "exit 7"], Some(&path));
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_check_switch_without_section() {
    let dir = TempDir::new().unwrap();
    let path = local_config(&dir, "");

    let output = run_cli(&["check", "switch"], Some(&path));
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_str(&output).contains("[switch]"));
}

#[test]
fn test_sample_local_json() {
    let dir = TempDir::new().unwrap();
    let path = local_config(&dir, "");

    let output = run_cli(&["sample", "--duration", "1", "--format", "json"], Some(&path));
    assert!(output.status.success(), "stderr: {}", stderr_str(&output));

    let report: serde_json::Value = serde_json::from_str(&stdout_str(&output)).unwrap();
    assert_eq!(report["status"]["state"], "stopped");
    let series = report["series"].as_array().unwrap();
    assert!(series.iter().any(|s| s["key"]["metric"] == "answer"));
}

#[test]
fn test_scan_failure_exits_with_scan_code() {
    let dir = TempDir::new().unwrap();
    let path = local_config(
        &dir,
        r#"
[switch]
local = true

[scan]
ports = ["1/1", "1/2"]
toggle_limit = 1
scan_interval_ms = 0
toggle_wait_ms = 0
eye_scan_wait_ms = 0

[scan.commands]
toggle_off = "true {port}"
toggle_on = "true {port}"
eye_scan = "echo FAIL {port}"
"#,
    );

    let output = run_cli(&["scan", "--format", "json"], Some(&path));
    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr_str(&output));

    let report: serde_json::Value = serde_json::from_str(&stdout_str(&output)).unwrap();
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["outcome"], "fail");
    assert_eq!(results[0]["attempts"], 1);
}

#[test]
fn test_scan_passes_with_port_override() {
    let dir = TempDir::new().unwrap();
    let path = local_config(
        &dir,
        r#"
[switch]
local = true

[scan]
ports = ["1/1"]
toggle_wait_ms = 0
eye_scan_wait_ms = 0

[scan.commands]
toggle_off = "true {port}"
toggle_on = "true {port}"
eye_scan = "echo PASS {port}"
"#,
    );

    let output = run_cli(&["scan", "--port", "2/5"], Some(&path));
    assert!(output.status.success(), "stderr: {}", stderr_str(&output));
    let stdout = stdout_str(&output);
    assert!(stdout.contains("2/5"));
    assert!(stdout.contains("Passed:  1"));
}
