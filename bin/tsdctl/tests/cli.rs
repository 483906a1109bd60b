//! ---
//! tsd_section: "05-networking-external-interfaces"
//! tsd_subsection: "binary"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "End-to-end checks of the tsdctl binary."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::tempdir;

const TEMPLATE: &str = "SECRET_KEY=__SECRET_KEY__\n\
DEBUG=False\n\
DATABASE_NAME=timesheet_prod\n\
DATABASE_USER=sa\n\
DATABASE_PASSWORD=ChangeMe!2024\n\
DATABASE_HOST=db\n\
DATABASE_PORT=1433\n";

fn tsdctl(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tsdctl").unwrap();
    cmd.current_dir(dir)
        .env_remove("TSD_CONFIG")
        .env("TSD_LOG", "warn");
    cmd
}

fn write_template(dir: &Path) {
    fs::create_dir_all(dir.join("deploy")).unwrap();
    fs::write(dir.join("deploy/env.template"), TEMPLATE).unwrap();
}

#[test]
fn init_creates_resource_once() {
    let dir = tempdir().unwrap();
    write_template(dir.path());

    let first = tsdctl(dir.path()).arg("init").assert().success();
    let stdout = String::from_utf8_lossy(&first.get_output().stdout).into_owned();
    assert!(stdout.contains("created"));

    let written = fs::read_to_string(dir.path().join(".env")).unwrap();
    assert!(!written.contains("__SECRET_KEY__"));
    let secret = written
        .lines()
        .find_map(|line| line.strip_prefix("SECRET_KEY="))
        .unwrap();
    assert!(secret.len() >= 50);
    assert!(!stdout.contains(secret));

    let second = tsdctl(dir.path()).arg("init").assert().success();
    let stdout = String::from_utf8_lossy(&second.get_output().stdout).into_owned();
    assert!(stdout.contains("left unchanged"));
    assert_eq!(fs::read_to_string(dir.path().join(".env")).unwrap(), written);
}

#[test]
fn init_without_template_is_a_config_failure() {
    let dir = tempdir().unwrap();
    tsdctl(dir.path()).arg("init").assert().code(2);
    assert!(!dir.path().join(".env").exists());
}

#[test]
fn stack_commands_need_an_initialised_resource() {
    let dir = tempdir().unwrap();
    write_template(dir.path());
    let assert = tsdctl(dir.path()).arg("status").assert().code(2);
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("tsdctl init"));
    assert!(!dir.path().join(".env").exists());
}

#[test]
fn clean_refuses_volume_removal_without_confirmation() {
    let dir = tempdir().unwrap();
    tsdctl(dir.path())
        .args(["clean", "--volumes"])
        .assert()
        .code(1);
}

#[test]
fn explicit_settings_file_must_exist() {
    let dir = tempdir().unwrap();
    tsdctl(dir.path())
        .args(["--settings", "missing.toml", "status"])
        .assert()
        .code(2);
}

#[test]
fn help_lists_every_subcommand() {
    let dir = tempdir().unwrap();
    let assert = tsdctl(dir.path()).arg("help").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    for command in [
        "init",
        "deploy",
        "start",
        "stop",
        "restart",
        "status",
        "logs",
        "shell",
        "dbshell",
        "migrate",
        "collectstatic",
        "createsuperuser",
        "backup-db",
        "restore-db",
        "list-backups",
        "delete-backup",
        "update",
        "clean",
        "health",
        "diagnose",
        "wait-for-db",
    ] {
        assert!(stdout.contains(command), "help is missing {command}");
    }
}

#[test]
fn version_flag_prints_json() {
    let dir = tempdir().unwrap();
    let assert = tsdctl(dir.path()).arg("-V").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    assert!(stdout.contains("\"semver\""));
}
