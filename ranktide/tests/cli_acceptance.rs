//! CLI acceptance tests
//!
//! Each test runs the real binary against an isolated XDG tree so nothing
//! touches the developer's actual database or logs.

use assert_cmd::Command;
use tempfile::TempDir;

fn ranktide(tmp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ranktide").unwrap();
    cmd.env("XDG_DATA_HOME", tmp.path().join("data"))
        .env("XDG_STATE_HOME", tmp.path().join("state"))
        .env("XDG_CONFIG_HOME", tmp.path().join("config"));
    cmd
}

#[test]
fn test_help_runs() {
    Command::cargo_bin("ranktide")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn test_sites_list_on_empty_database() {
    let tmp = TempDir::new().unwrap();
    ranktide(&tmp).args(["sites", "list"]).assert().success();
}

#[test]
fn test_site_registration_round_trip() {
    let tmp = TempDir::new().unwrap();

    ranktide(&tmp)
        .args([
            "sites",
            "add",
            "--domain",
            "shop.example.com",
            "--name",
            "Example Shop",
            "--owner",
            "alice",
        ])
        .assert()
        .success();

    let output = ranktide(&tmp).args(["sites", "list"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("shop.example.com"));
    assert!(stdout.contains("active"));

    // Duplicate domains are refused
    ranktide(&tmp)
        .args([
            "sites",
            "add",
            "--domain",
            "shop.example.com",
            "--name",
            "Duplicate",
            "--owner",
            "bob",
        ])
        .assert()
        .failure();
}

#[test]
fn test_schedule_show_and_toggle() {
    let tmp = TempDir::new().unwrap();

    let output = ranktide(&tmp).args(["schedule", "show"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("collection: enabled"));
    assert!(stdout.contains("reporting: enabled"));

    ranktide(&tmp)
        .args(["schedule", "disable", "collection"])
        .assert()
        .success();

    let output = ranktide(&tmp).args(["schedule", "show"]).output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("collection: disabled"));
}
