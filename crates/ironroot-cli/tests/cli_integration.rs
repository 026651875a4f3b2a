//! CLI subprocess integration tests.
//!
//! These tests invoke the `ironroot` binary as a subprocess and verify exit
//! codes and JSON output. Every install here is a dry run.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn ironroot_bin(tmp: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ironroot"));
    cmd.env("IRONROOT_SKIP_PREREQS", "1");
    cmd.env_remove("IRONROOT_LOG");
    // Keep the per-run work directory inside the test's temp dir.
    cmd.env("TMPDIR", tmp);
    cmd
}

fn write_config(dir: &Path, devices: &[&str]) -> PathBuf {
    let list = devices
        .iter()
        .map(|d| format!("\"{d}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let path = dir.join("install.toml");
    std::fs::write(
        &path,
        format!(
            r#"config_version = 1

[disks]
devices = [{list}]

[pool]
name = "rpool"
raid = "mirror"

[encryption]
mode = "none"

[network]
mode = "dhcp"

[installer]
state_dir = "{}"
"#,
            dir.join("state").display()
        ),
    )
    .unwrap();
    path
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().unwrap()
}

#[test]
fn cli_version_exits_zero() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(ironroot_bin(tmp.path()).arg("--version"));
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("ironroot"));
}

#[test]
fn cli_help_lists_flags() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(ironroot_bin(tmp.path()).arg("--help"));
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for flag in ["--config", "--validate", "--no-pivot", "--dry-run", "--unattended"] {
        assert!(stdout.contains(flag), "help is missing {flag}");
    }
    assert!(!stdout.contains("--resume-context"));
}

#[test]
fn validate_accepts_good_config() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), &["/dev/sda", "/dev/sdb"]);
    let out = run(ironroot_bin(tmp.path())
        .args(["--validate", "--json", "--config"])
        .arg(&config));
    assert_eq!(out.status.code(), Some(0));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["valid"], true);
    assert!(json["issues"].as_array().unwrap().is_empty());
}

#[test]
fn validate_rejects_mirror_on_one_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), &["/dev/sda"]);
    let out = run(ironroot_bin(tmp.path())
        .args(["--validate", "--json", "--config"])
        .arg(&config));
    assert_eq!(out.status.code(), Some(2));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["valid"], false);
    let fields: Vec<&str> = json["issues"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|i| i["field"].as_str())
        .collect();
    assert!(fields.contains(&"pool.raid"));
}

#[test]
fn validate_rejects_unparseable_config() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("install.toml");
    std::fs::write(&path, "config_version = 1\nbogus = [").unwrap();
    let out = run(ironroot_bin(tmp.path()).arg("--validate").arg("--config").arg(&path));
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("error:"));
}

#[test]
fn dry_run_install_completes_with_warnings() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), &["/dev/sda", "/dev/sdb"]);
    let out = run(ironroot_bin(tmp.path())
        .args(["--dry-run", "--no-pivot", "--unattended", "--json", "--config"])
        .arg(&config));
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["outcome"]["result"], "success-with-warnings");
    let stages: Vec<&str> = json["stages"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["name"].as_str())
        .collect();
    assert_eq!(
        stages,
        vec!["disk", "encryption", "pool", "system", "bootloader", "network"]
    );
    assert_eq!(json["phases"].as_array().unwrap().last().unwrap(), "done");
    // Dry runs leave no journal or lock behind.
    assert!(!tmp.path().join("state").exists());
}

#[test]
fn unattended_without_config_is_a_precondition_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(ironroot_bin(tmp.path()).args(["--dry-run", "--unattended"]));
    assert_eq!(out.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&out.stderr).contains("--config"));
}

#[test]
fn invalid_config_refuses_to_install() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), &["sda"]);
    let out = run(ironroot_bin(tmp.path())
        .args(["--dry-run", "--unattended", "--config"])
        .arg(&config));
    assert_eq!(out.status.code(), Some(4));
}
