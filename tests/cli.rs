//! CLI smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("remotest")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn validate_accepts_a_wellformed_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("remotest.toml");
    std::fs::write(
        &config,
        "[org]\ninstance_url = \"https://org.example.com\"\n",
    )
    .unwrap();

    Command::cargo_bin("remotest")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn validate_rejects_a_broken_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("remotest.toml");
    std::fs::write(&config, "not toml at all [").unwrap();

    Command::cargo_bin("remotest")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "validate"])
        .assert()
        .failure();
}

#[test]
fn init_writes_a_starter_config_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("remotest.toml");

    Command::cargo_bin("remotest")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "init"])
        .assert()
        .success();
    assert!(config.exists());

    // Refuses to clobber an existing file.
    Command::cargo_bin("remotest")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}
