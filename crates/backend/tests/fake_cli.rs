#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use volume_backup_backend::{BackendError, DockerBackend, VolumeBackend};

/// Writes an executable stand-in for the docker CLI.
fn fake_cli(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("docker");
    fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn backend(cli: &Path) -> DockerBackend {
    DockerBackend::new(cli.to_string_lossy(), "busybox")
}

#[tokio::test]
async fn archive_missing_after_clean_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(tmp.path(), "exit 0");

    let err = backend(&cli)
        .create_archive("db-data", tmp.path(), "db-data.tar.gz")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::ArchiveMissing { .. }), "{err}");
    assert!(err.to_string().contains("db-data.tar.gz"));
}

#[tokio::test]
async fn archive_present_after_clean_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(tmp.path(), "exit 0");
    fs::write(tmp.path().join("db-data.tar.gz"), b"archive").unwrap();

    backend(&cli)
        .create_archive("db-data", tmp.path(), "db-data.tar.gz")
        .await
        .unwrap();
}

#[tokio::test]
async fn non_zero_exit_is_command_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(tmp.path(), "echo 'no such volume' >&2\nexit 1");

    let err = backend(&cli)
        .create_archive("db-data", tmp.path(), "db-data.tar.gz")
        .await
        .unwrap_err();
    match err {
        BackendError::CommandFailed { stderr, .. } => assert_eq!(stderr, "no such volume"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn restore_requires_archive_before_running() {
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("ran");
    let cli = fake_cli(tmp.path(), &format!("touch {}", marker.display()));

    let err = backend(&cli)
        .restore_archive("db-data", tmp.path(), "gone.tar.gz")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::ArchiveMissing { .. }));
    assert!(!marker.exists());
}

#[tokio::test]
async fn admission_checks_read_cli_output() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        tmp.path(),
        r#"case "$1" in
  volume)
    if [ "$2" = "ls" ]; then
      printf 'db-data\tlocal\t/var/lib/docker/volumes/db-data/_data\n'
    else
      [ "$3" = "db-data" ]
    fi ;;
  ps) if [ "$4" = "volume=db-data" ]; then echo 3f2a1b; fi ;;
esac"#,
    );
    let backend = backend(&cli);

    assert!(backend.volume_exists("db-data").await.unwrap());
    assert!(!backend.volume_exists("other").await.unwrap());
    assert!(backend.volume_in_use("db-data").await.unwrap());
    assert!(!backend.volume_in_use("other").await.unwrap());

    let volumes = backend.list_volumes().await.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].name, "db-data");
    assert_eq!(volumes[0].driver, "local");
}
