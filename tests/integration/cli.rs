#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn help_lists_subcommands() {
    let output = cargo_bin_cmd!("txgraph")
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let help = String::from_utf8(output).expect("utf8");
    for command in ["tx", "address", "resume", "config"] {
        assert!(help.contains(command), "missing {command} in:\n{help}");
    }
}

#[test]
fn config_merges_file_and_flags() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(&dir, "page_size = 7\nlog_filter = \"txgraph=debug\"\n");
    let output = cargo_bin_cmd!("txgraph")
        .arg("--config")
        .arg(&config)
        .args(["--api-base", "http://127.0.0.1:3002/", "--format", "json", "config"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["page_size"], 7);
    assert_eq!(json["api_base"], "http://127.0.0.1:3002/");
    assert_eq!(json["log_filter"], "txgraph=debug");
}

#[test]
fn invalid_config_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(&dir, "page_size = 0\n");
    let output = cargo_bin_cmd!("txgraph")
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("page_size"), "{stderr}");
}

#[test]
fn malformed_txid_fails_before_any_download() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(&dir, "");
    let db = dir.path().join("graph.db");
    let output = cargo_bin_cmd!("txgraph")
        .arg("--config")
        .arg(&config)
        .arg("--db")
        .arg(&db)
        .args(["--api-base", "http://127.0.0.1:9/", "tx", "not-a-hash"])
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("not a transaction hash"), "{stderr}");
}
