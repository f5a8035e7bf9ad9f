use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("chathdi")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("clear"));
}

#[test]
fn clear_reports_the_number_of_removed_sessions() {
    let data_dir = TempDir::new().unwrap();
    Command::cargo_bin("chathdi")
        .unwrap()
        .env("CHATHDI_DATA_DIR", data_dir.path())
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 0 session(s)."));
}
