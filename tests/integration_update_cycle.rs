//! End-to-end archive update cycle against an in-process release server:
//! descriptor fetch, package download and verification, extraction, install
//! onto a scratch system root, and module migration tooling, with the
//! status lifecycle asserted at each boundary.

use otad::config::AgentConfig;
use otad::orchestrator::Orchestrator;
use otad::status::{MSG_OUT_OF_DATE, MSG_READY_TO_UPDATE, MSG_UP_TO_DATE, Phase};
use otad::strategy::DeploymentMode;
use otad::test_utils::{StubMirror, StubResponse, sha256_hex, tar_gz};
use std::collections::HashMap;
use tempfile::TempDir;

const DESCRIPTOR: &str = "version: v0.4.9\n\
    mirrors: [\"${SELF}\"]\n\
    packages:\n\
    \x20 - path: get/v0.4.9/appliance-amd64.tar.gz\n\
    \x20   architecture: amd64\n\
    modules:\n\
    \x20 - name: otad-user-service\n\
    \x20   short: user-service\n\
    checksums: get/v0.4.9/checksums.txt\n";

fn archive_config(tmp: &TempDir, mirror: String) -> AgentConfig {
    let config = AgentConfig {
        cache_dir: tmp.path().join("cache"),
        sys_root: tmp.path().join("sysroot"),
        mirrors: vec![mirror],
        mode: DeploymentMode::Archive,
        ..AgentConfig::default()
    };
    std::fs::create_dir_all(&config.sys_root).unwrap();
    config
}

/// A release server whose package ships a binary and a migration list with
/// one bare-version entry, plus the tool archive that entry expands to.
async fn release_server() -> StubMirror {
    let package = tar_gz(&[
        ("usr/bin/otad", b"release 0.4.9".as_slice()),
        ("migrations/user-service.list", b"v0.3.5\n".as_slice()),
    ]);
    let manifest = format!("{} appliance-amd64.tar.gz\n", sha256_hex(&package));
    let tool = tar_gz(&[("migrate", b"#!/bin/sh".as_slice())]);

    StubMirror::start_with_release(
        DESCRIPTOR,
        HashMap::from([
            ("/get/v0.4.9/checksums.txt".to_string(), StubResponse::ok(manifest)),
            ("/get/v0.4.9/appliance-amd64.tar.gz".to_string(), StubResponse::ok(package)),
            (
                "/get/v0.3.5/linux-amd64-user-service-migration-v0.3.5.tar.gz".to_string(),
                StubResponse::ok(tool),
            ),
        ]),
    )
    .await
}

#[tokio::test]
async fn test_full_cycle_with_migration_tools() {
    let tmp = TempDir::new().unwrap();
    let server = release_server().await;
    let config = archive_config(&tmp, server.url());
    let sys_root = config.sys_root.clone();
    let cache_dir = config.cache_dir.clone();

    let orchestrator = Orchestrator::new(config).unwrap();
    let tracker = orchestrator.tracker();

    // Fetch alone reports an upgrade exists but is not yet downloaded.
    let release = tracker.fetch_release("latest").await.unwrap();
    assert_eq!(tracker.status().phase, Phase::Idle);
    assert_eq!(tracker.status().message, MSG_OUT_OF_DATE);

    // The migration plan is computed against the extracted tree, which
    // does not exist yet, so only eligibility is known here.
    assert!(tracker.strategy().should_upgrade(&release).await);
    assert!(!tracker.strategy().is_upgradable(&release).await);

    tracker.download_release(&release, false).await.unwrap();
    assert_eq!(tracker.status().message, MSG_READY_TO_UPDATE);
    assert!(tracker.strategy().is_upgradable(&release).await);

    tracker.install(&release).await.unwrap();
    let status = tracker.status();
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(status.message, MSG_UP_TO_DATE);

    // The release landed on the system root and recorded its version.
    assert_eq!(std::fs::read(sys_root.join("usr/bin/otad")).unwrap(), b"release 0.4.9");
    assert_eq!(
        std::fs::read_to_string(sys_root.join("etc/otad/VERSION")).unwrap(),
        "v0.4.9"
    );

    // Migration tooling was downloaded during the cycle and cleaned up
    // after completion.
    assert!(!cache_dir.join("releases/v0.4.9/migration-tools").exists());

    // The appliance now reports up to date on re-check.
    assert!(!tracker.strategy().should_upgrade(&release).await);
}

#[tokio::test]
async fn test_migration_plan_windows_to_version_gap() {
    let tmp = TempDir::new().unwrap();
    let server = release_server().await;
    let config = archive_config(&tmp, server.url());
    let orchestrator = Orchestrator::new(config).unwrap();
    let tracker = orchestrator.tracker();

    let release = tracker.fetch_release("latest").await.unwrap();
    let artifact = tracker.download_release(&release, false).await.unwrap();
    tracker.strategy().extract_release(&artifact, &release).await.unwrap();

    let plans = tracker.strategy().migration_info(&release).await.unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans["user-service"].len(), 1);
    assert_eq!(plans["user-service"][0].version.to_string(), "v0.3.5");

    let tools = tracker.strategy().download_all_migration_tools(&release).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert!(tools[0].ends_with(
        "user-service/linux-amd64-user-service-migration-v0.3.5.tar.gz"
    ));
}

#[tokio::test]
async fn test_tampered_artifact_ends_in_install_error() {
    let tmp = TempDir::new().unwrap();
    let server = release_server().await;
    let config = archive_config(&tmp, server.url());
    let cache_dir = config.cache_dir.clone();
    let orchestrator = Orchestrator::new(config).unwrap();
    let tracker = orchestrator.tracker();

    let release = tracker.fetch_release("latest").await.unwrap();
    let artifact = tracker.download_release(&release, false).await.unwrap();
    assert!(artifact.starts_with(&cache_dir));
    std::fs::write(&artifact, b"tampered after download").unwrap();

    let err = tracker.install(&release).await.unwrap_err();
    let status = tracker.status();
    assert_eq!(status.phase, Phase::InstallError);
    assert_eq!(status.message, err.to_string());
    assert!(status.message.contains("checksum mismatch"));
}

#[tokio::test]
async fn test_cycle_survives_mirror_loss_after_first_fetch() {
    let tmp = TempDir::new().unwrap();
    let server = release_server().await;
    let config = archive_config(&tmp, server.url());
    let orchestrator = Orchestrator::new(config).unwrap();
    let tracker = orchestrator.tracker();

    let release = tracker.fetch_release("latest").await.unwrap();
    drop(server);

    // Descriptor fetch falls back to the cached copy; only the package
    // download needs the mirror, and it is gone.
    let cached = tracker.fetch_release("latest").await.unwrap();
    assert_eq!(cached.version, release.version);
    assert!(tracker.download_release(&release, false).await.is_err());
    assert_eq!(tracker.status().message, MSG_OUT_OF_DATE);
}
