//! CLI surface: version, help, usage errors.

use assert_cmd::Command;

#[test]
fn version_flag_prints_name_and_semver() {
    let assert = Command::cargo_bin("agnt")
        .unwrap()
        .arg("--version")
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let line = stdout.trim();
    assert!(line.starts_with("agnt v"), "unexpected version line: {line}");
    // v<MAJOR.MINOR.PATCH>
    let semver = line.trim_start_matches("agnt v");
    assert_eq!(semver.split('.').count(), 3, "not a semver: {semver}");
}

#[test]
fn daemon_version_flag_prints_semver() {
    let assert = Command::cargo_bin("agntd")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.trim().starts_with("agntd "));
}

#[test]
fn unknown_subcommand_is_a_usage_error() {
    Command::cargo_bin("agnt")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .code(2);
}

#[test]
fn unknown_daemon_flag_is_a_usage_error() {
    Command::cargo_bin("agntd")
        .unwrap()
        .arg("--frobnicate")
        .assert()
        .code(2);
}

#[test]
fn help_mentions_core_commands() {
    let assert = Command::cargo_bin("agnt")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    for command in ["daemon", "run", "proc", "session"] {
        assert!(stdout.contains(command), "help missing `{command}`");
    }
}
