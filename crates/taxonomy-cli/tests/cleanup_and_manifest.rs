#![allow(missing_docs)]

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

fn taxonomy_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("taxonomy"))
}

#[test]
fn cleanup_checkpoints_on_a_run_with_no_checkpoints_reports_nothing_removed() {
    let config_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();

    taxonomy_cmd()
        .env("TAXONOMY_CONFIG_DIR", config_dir.path())
        .env("TAXONOMY_SETTINGS__paths__output_dir", output_dir.path().to_str().unwrap())
        .args(["cleanup-checkpoints", "--run-id", "no-such-run", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("\"removed\": []"))
        .stdout(contains("\"retained\": []"));
}

#[test]
fn manifest_show_fails_clearly_when_the_run_does_not_exist() {
    let config_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();

    taxonomy_cmd()
        .env("TAXONOMY_CONFIG_DIR", config_dir.path())
        .env("TAXONOMY_SETTINGS__paths__output_dir", output_dir.path().to_str().unwrap())
        .args(["manifest", "show", "--run-id", "no-such-run"])
        .assert()
        .failure();
}
