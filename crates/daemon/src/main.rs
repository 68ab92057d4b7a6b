use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use volume_backup_backend::{DockerBackend, VolumeBackend};
use volume_backup_core::{Clock, SystemClock};
use volume_backup_daemon::config::{self, Config, Settings};
use volume_backup_daemon::BackupService;
use volume_backup_scheduler::{JobExecutor, Scheduler};
use volume_backup_storage::BackupRepository;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (cfg, mode) = parse_args()?;
    let settings = Settings::from_env(&cfg)?;

    let repo = BackupRepository::init(&settings.root, settings.database_url.as_deref()).await?;
    let backup_dir = settings.prepare_backup_dir()?;

    let backend: Arc<dyn VolumeBackend> = Arc::new(DockerBackend::new(
        settings.docker_binary.clone(),
        settings.helper_image.clone(),
    ));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let executor = Arc::new(JobExecutor::new(
        repo.ledger(),
        backend.clone(),
        backup_dir,
        clock.clone(),
    ));
    let scheduler = Scheduler::new(repo.schedules(), executor, clock, settings.max_sleep);
    let service = BackupService::new(scheduler, repo, backend);

    match mode.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] => run_service(service).await,
        ["backup", volume] => run_once(&service, volume).await,
        other => bail!("unknown mode: {}", other.join(" ")),
    }
}

/// Parse CLI args, returning the loaded config and the positional mode words.
fn parse_args() -> Result<(Config, Vec<String>)> {
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut mode = Vec::new();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() {
                    bail!("--config requires a path argument");
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            other => mode.push(other.to_owned()),
        }
        i += 1;
    }

    let cfg = match config_path {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(&path)?
        }
        None => Config::default(),
    };

    Ok((cfg, mode))
}

async fn run_once(service: &BackupService, volume: &str) -> Result<()> {
    let backup = service.backup_now(volume).await?;
    info!(
        backup_id = %backup.backup_id,
        filename = ?backup.backup_filename,
        "backup created"
    );
    Ok(())
}

async fn run_service(service: BackupService) -> Result<()> {
    service.scheduler().start().await?;
    info!(
        schedules = service.list_schedules().await.len(),
        "volume backup daemon running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;
    info!("shutdown requested");
    service.scheduler().stop().await;
    Ok(())
}
