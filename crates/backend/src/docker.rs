use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{BackendError, VolumeBackend, VolumeInfo};

/// Runs archive and restore through the docker CLI, mounting the volume into
/// a throwaway helper container that has `tar`.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    binary: String,
    helper_image: String,
}

struct Output {
    success: bool,
    stdout: String,
}

impl DockerBackend {
    pub fn new(binary: impl Into<String>, helper_image: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            helper_image: helper_image.into(),
        }
    }

    fn archive_args(&self, volume: &str, dest_dir: &Path, filename: &str) -> Vec<OsString> {
        vec![
            "run".into(),
            "--rm".into(),
            "-v".into(),
            format!("{volume}:/source:ro").into(),
            "-v".into(),
            mount(dest_dir, "/dest"),
            self.helper_image.clone().into(),
            "tar".into(),
            "czf".into(),
            format!("/dest/{filename}").into(),
            "-C".into(),
            "/source".into(),
            ".".into(),
        ]
    }

    fn restore_args(&self, volume: &str, src_dir: &Path, filename: &str) -> Vec<OsString> {
        vec![
            "run".into(),
            "--rm".into(),
            "-v".into(),
            format!("{volume}:/target").into(),
            "-v".into(),
            mount(src_dir, "/archive:ro"),
            self.helper_image.clone().into(),
            "tar".into(),
            "xzf".into(),
            format!("/archive/{filename}").into(),
            "-C".into(),
            "/target".into(),
        ]
    }

    /// Runs the CLI off the async runtime. A non-zero exit is only an error
    /// when `check` is set.
    async fn run(&self, args: Vec<OsString>, check: bool) -> Result<Output, BackendError> {
        let program = self.binary.clone();
        debug!(%program, ?args, "running docker command");
        tokio::task::spawn_blocking(move || {
            let out = Command::new(&program)
                .args(&args)
                .output()
                .map_err(|source| BackendError::Io {
                    program: program.clone(),
                    source,
                })?;
            if check && !out.status.success() {
                return Err(BackendError::CommandFailed {
                    program,
                    status: out.status.to_string(),
                    stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
                });
            }
            Ok(Output {
                success: out.status.success(),
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            })
        })
        .await
        .map_err(|err| BackendError::Io {
            program: self.binary.clone(),
            source: std::io::Error::other(err),
        })?
    }
}

fn mount(dir: &Path, target: &str) -> OsString {
    let mut arg = dir.as_os_str().to_owned();
    arg.push(":");
    arg.push(target);
    arg
}

const VOLUME_LS_FORMAT: &str = "{{.Name}}\t{{.Driver}}\t{{.Mountpoint}}";

/// Parses `docker volume ls` output in [`VOLUME_LS_FORMAT`].
fn parse_volume_list(stdout: &str) -> Vec<VolumeInfo> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut cols = line.splitn(3, '\t');
            let mut next = || cols.next().unwrap_or_default().trim().to_owned();
            VolumeInfo {
                name: next(),
                driver: next(),
                mountpoint: next(),
            }
        })
        .collect()
}

fn require_file(path: PathBuf) -> Result<(), BackendError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(BackendError::ArchiveMissing { path })
    }
}

#[async_trait]
impl VolumeBackend for DockerBackend {
    async fn volume_exists(&self, volume: &str) -> Result<bool, BackendError> {
        let out = self
            .run(vec!["volume".into(), "inspect".into(), volume.into()], false)
            .await?;
        Ok(out.success)
    }

    async fn volume_in_use(&self, volume: &str) -> Result<bool, BackendError> {
        let out = self
            .run(
                vec![
                    "ps".into(),
                    "-a".into(),
                    "--filter".into(),
                    format!("volume={volume}").into(),
                    "-q".into(),
                ],
                true,
            )
            .await?;
        Ok(!out.stdout.trim().is_empty())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, BackendError> {
        let out = self
            .run(
                vec![
                    "volume".into(),
                    "ls".into(),
                    "--format".into(),
                    VOLUME_LS_FORMAT.into(),
                ],
                true,
            )
            .await?;
        Ok(parse_volume_list(&out.stdout))
    }

    async fn create_archive(
        &self,
        volume: &str,
        dest_dir: &Path,
        filename: &str,
    ) -> Result<(), BackendError> {
        info!(volume, filename, "archiving volume");
        self.run(self.archive_args(volume, dest_dir, filename), true)
            .await?;
        require_file(dest_dir.join(filename))
    }

    async fn restore_archive(
        &self,
        volume: &str,
        src_dir: &Path,
        filename: &str,
    ) -> Result<(), BackendError> {
        require_file(src_dir.join(filename))?;
        info!(volume, filename, "restoring volume");
        self.run(self.restore_args(volume, src_dir, filename), true)
            .await?;
        Ok(())
    }
}
