use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub docker: DockerConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<String>,
    pub database_url: Option<String>,
    pub backup_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_sleep_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DockerConfig {
    pub binary: Option<String>,
    pub helper_image: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

/// Effective settings: environment first, then the config file, then defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub root: PathBuf,
    pub database_url: Option<String>,
    pub backup_dir: PathBuf,
    pub max_sleep: Duration,
    pub docker_binary: String,
    pub helper_image: String,
}

impl Settings {
    pub fn from_env(cfg: &Config) -> Result<Self> {
        Self::resolve(cfg, |key| env::var(key).ok())
    }

    pub fn resolve(cfg: &Config, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let root = PathBuf::from(
            env("VOLUME_BACKUP_ROOT")
                .or_else(|| cfg.storage.root.clone())
                .unwrap_or_else(|| "./data".to_owned()),
        );

        let database_url = env("DATABASE_URL").or_else(|| cfg.storage.database_url.clone());

        let backup_dir = env("BACKUP_DIR")
            .or_else(|| cfg.storage.backup_dir.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join("backups"));

        let max_sleep_secs = match env("VOLUME_BACKUP_MAX_SLEEP_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("invalid VOLUME_BACKUP_MAX_SLEEP_SECS: {raw}"))?,
            None => cfg.scheduler.max_sleep_secs.unwrap_or(60),
        };

        Ok(Self {
            root,
            database_url,
            backup_dir,
            max_sleep: Duration::from_secs(max_sleep_secs.max(1)),
            docker_binary: env("VOLUME_BACKUP_DOCKER")
                .or_else(|| cfg.docker.binary.clone())
                .unwrap_or_else(|| "docker".to_owned()),
            helper_image: env("VOLUME_BACKUP_HELPER_IMAGE")
                .or_else(|| cfg.docker.helper_image.clone())
                .unwrap_or_else(|| "busybox".to_owned()),
        })
    }

    /// Creates the backup directory and returns its absolute path, which is
    /// what a container bind mount needs.
    pub fn prepare_backup_dir(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.backup_dir).with_context(|| {
            format!("create backup directory {}", self.backup_dir.display())
        })?;
        std::fs::canonicalize(&self.backup_dir)
            .with_context(|| format!("resolve backup directory {}", self.backup_dir.display()))
    }
}
