//! CLI surface tests running the compiled binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_config(tmp: &TempDir, mirror: &str) -> std::path::PathBuf {
    let path = tmp.path().join("otad.toml");
    std::fs::write(
        &path,
        format!(
            "mode = \"archive\"\n\
             cache_dir = \"{}\"\n\
             sys_root = \"{}\"\n\
             mirrors = [\"{mirror}\"]\n",
            tmp.path().join("cache").display(),
            tmp.path().join("sysroot").display(),
        ),
    )
    .unwrap();
    std::fs::create_dir_all(tmp.path().join("sysroot")).unwrap();
    path
}

#[test]
fn test_help_lists_verbs() {
    Command::cargo_bin("otad")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_status_prints_idle_json() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(&tmp, "http://127.0.0.1:9/");
    Command::cargo_bin("otad")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"phase\": \"idle\""))
        .stdout(predicate::str::contains("\"message\": \"up-to-date\""));
}

#[test]
fn test_check_against_dead_mirror_fails_with_hint() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(&tmp, "http://127.0.0.1:9/");
    Command::cargo_bin("otad")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found on any mirror"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_unparseable_config_refuses_to_start() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("otad.toml");
    std::fs::write(&path, "mode = \"time-machine\"\n").unwrap();
    Command::cargo_bin("otad")
        .unwrap()
        .args(["--config", path.to_str().unwrap(), "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}
