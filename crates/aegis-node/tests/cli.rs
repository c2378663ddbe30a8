//! Binary smoke tests for aegis-node.
//!
//! Spawns the compiled binary and asserts the operator CLI contract:
//! status output, single-tick runs, and exit code 1 on configuration
//! validation failure.
//!
//! Run with:
//!   cargo test -p aegis-node --test cli

use std::path::PathBuf;
use std::process::{Command, Output};

const ENV_KEYS: [&str; 9] = [
    "AEGIS_CHAIN_ENDPOINT",
    "AEGIS_EXECUTOR_KEY",
    "AEGIS_DCA_ADAPTER",
    "AEGIS_STOP_LOSS_ADAPTER",
    "AEGIS_REBALANCE_ADAPTER",
    "AEGIS_SUBSCRIPTION_ADAPTER",
    "AEGIS_ORACLE_ADDRESS",
    "AEGIS_INDEXER_ENDPOINT",
    "AEGIS_EXECUTION_ENABLED",
];

fn data_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("aegis_cli_{}_{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn node_command(tag: &str) -> (Command, PathBuf) {
    let dir = data_dir(tag);
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_aegis-node"));
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    cmd.arg("--data-dir").arg(&dir);
    (cmd, dir)
}

fn with_full_env(cmd: &mut Command) {
    cmd.env("AEGIS_CHAIN_ENDPOINT", "http://127.0.0.1:8545")
        .env("AEGIS_EXECUTOR_KEY", "deadbeefcafe")
        .env("AEGIS_DCA_ADAPTER", "0x0101010101010101010101010101010101010101")
        .env(
            "AEGIS_STOP_LOSS_ADAPTER",
            "0x0202020202020202020202020202020202020202",
        )
        .env(
            "AEGIS_REBALANCE_ADAPTER",
            "0x0303030303030303030303030303030303030303",
        )
        .env(
            "AEGIS_SUBSCRIPTION_ADAPTER",
            "0x0404040404040404040404040404040404040404",
        )
        .env(
            "AEGIS_ORACLE_ADDRESS",
            "0x0505050505050505050505050505050505050505",
        );
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn missing_config_exits_one() {
    let (mut cmd, dir) = node_command("noconfig");
    let output = cmd.args(["scheduler", "status"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("configuration error"),
        "stderr was: {stderr}"
    );
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn invalid_execution_flag_exits_one() {
    let (mut cmd, dir) = node_command("badflag");
    with_full_env(&mut cmd);
    cmd.env("AEGIS_EXECUTION_ENABLED", "maybe");
    let output = cmd.args(["scheduler", "status"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn status_reports_executor_and_flag() {
    let (mut cmd, dir) = node_command("status");
    with_full_env(&mut cmd);
    let output = cmd.args(["scheduler", "status"]).output().unwrap();
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let out = stdout(&output);
    assert!(out.contains("executor address:  0x"), "stdout was: {out}");
    assert!(out.contains("execution enabled: false"), "stdout was: {out}");
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn run_once_ticks_cleanly_on_empty_state() {
    let (mut cmd, dir) = node_command("runonce");
    with_full_env(&mut cmd);
    cmd.env("AEGIS_EXECUTION_ENABLED", "true");
    let output = cmd
        .args(["--spacing-ms", "0", "scheduler", "run-once"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let out = stdout(&output);
    assert!(out.contains("selected=0"), "stdout was: {out}");
    let _ = std::fs::remove_dir_all(dir);
}
