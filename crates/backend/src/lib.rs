mod docker;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use docker::DockerBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("archive {} was not found", .path.display())]
    ArchiveMissing { path: PathBuf },
    #[error("archive {} already exists", .path.display())]
    ArchiveExists { path: PathBuf },
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// One volume as the engine reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
}

/// The volume engine the executor archives from and restores into.
///
/// Admission checks (`volume_exists`, `volume_in_use`) are for callers; the
/// archive operations themselves never consult them.
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    async fn volume_exists(&self, volume: &str) -> Result<bool, BackendError>;

    async fn volume_in_use(&self, volume: &str) -> Result<bool, BackendError>;

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, BackendError>;

    /// Writes the contents of `volume` to `dest_dir/filename`. Fails with
    /// [`BackendError::ArchiveMissing`] when the file is not there afterwards.
    async fn create_archive(
        &self,
        volume: &str,
        dest_dir: &Path,
        filename: &str,
    ) -> Result<(), BackendError>;

    /// Extracts `src_dir/filename` into `volume`.
    async fn restore_archive(
        &self,
        volume: &str,
        src_dir: &Path,
        filename: &str,
    ) -> Result<(), BackendError>;
}
