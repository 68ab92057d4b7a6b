use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use uuid::Uuid;
use volume_backup_backend::{VolumeBackend, VolumeInfo};
use volume_backup_core::{
    Attempt, Backup, BackupFilter, CrontabFields, Error, Job, JobAction, Page, PageRequest, RestoreFilter,
    RestoredBackup, Result, Schedule,
};
use volume_backup_scheduler::{mapper, Scheduler};
use volume_backup_storage::BackupRepository;

/// Caller-facing operations: admission checks, job submission, schedule
/// management and ledger reads.
#[derive(Clone)]
pub struct BackupService {
    scheduler: Scheduler,
    repo: BackupRepository,
    backend: Arc<dyn VolumeBackend>,
}

impl BackupService {
    pub fn new(scheduler: Scheduler, repo: BackupRepository, backend: Arc<dyn VolumeBackend>) -> Self {
        Self {
            scheduler,
            repo,
            backend,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    async fn require_volume(&self, volume: &str) -> Result<()> {
        let exists = self
            .backend
            .volume_exists(volume)
            .await
            .with_context(|| format!("check volume {volume}"))?;
        if exists {
            Ok(())
        } else {
            Err(Error::VolumeNotFound {
                volume: volume.to_owned(),
            })
        }
    }

    /// Volume exists and no container holds it.
    pub async fn admit(&self, volume: &str) -> Result<()> {
        self.require_volume(volume).await?;
        let busy = self
            .backend
            .volume_in_use(volume)
            .await
            .with_context(|| format!("check containers using {volume}"))?;
        if busy {
            return Err(Error::VolumeBusy {
                volume: volume.to_owned(),
            });
        }
        Ok(())
    }

    /// Submits a one-shot backup. The returned job id becomes the backup id.
    pub async fn start_backup(&self, volume: &str) -> Result<Job> {
        self.admit(volume).await?;
        let name = format!("backup-{volume}-{}", Uuid::new_v4());
        let job = self
            .scheduler
            .add_job(&name, volume, JobAction::Backup, None)
            .await?;
        info!(job_id = %job.id, volume, "backup started");
        Ok(job)
    }

    /// Admits and runs one backup to completion on the current task, without
    /// going through the scheduler.
    pub async fn backup_now(&self, volume: &str) -> Result<Backup> {
        self.admit(volume).await?;
        let id = Uuid::new_v4().to_string();
        let name = format!("backup-{volume}-{id}");
        self.scheduler
            .executor()
            .create_backup(volume, Attempt::one_shot(id), &name)
            .await
    }

    pub async fn list_volumes(&self) -> Result<Vec<VolumeInfo>> {
        Ok(self.backend.list_volumes().await.context("list volumes")?)
    }

    pub async fn start_restore(&self, volume: &str, backup_filename: &str) -> Result<Job> {
        self.admit(volume).await?;
        if self.repo.backup_for_filename(backup_filename).await?.is_none() {
            return Err(Error::BackupNotFound(backup_filename.to_owned()));
        }
        let name = format!("restore-{volume}-{}", Uuid::new_v4());
        let action = JobAction::Restore {
            backup_filename: backup_filename.to_owned(),
        };
        let job = self.scheduler.add_job(&name, volume, action, None).await?;
        info!(job_id = %job.id, volume, backup_filename, "restore started");
        Ok(job)
    }

    pub async fn create_schedule(
        &self,
        name: &str,
        volume: &str,
        crontab: CrontabFields,
    ) -> Result<Schedule> {
        let trigger = mapper::to_trigger(crontab)?;
        self.require_volume(volume).await?;
        let job = self
            .scheduler
            .add_job(name, volume, JobAction::Backup, Some(trigger))
            .await?;
        Ok(mapper::to_schedule(&job))
    }

    pub async fn get_schedule(&self, schedule_id: &str) -> Result<Schedule> {
        self.scheduler
            .get_job(schedule_id)
            .await
            .map(|job| mapper::to_schedule(&job))
            .ok_or_else(|| Error::ScheduleNotFound {
                id: schedule_id.to_owned(),
            })
    }

    pub async fn list_schedules(&self) -> Vec<Schedule> {
        mapper::to_schedules(&self.scheduler.list_jobs().await)
    }

    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<()> {
        self.scheduler.remove_job(schedule_id).await
    }

    /// Removes every listed schedule that exists and returns the ids that
    /// did not.
    pub async fn delete_schedules(&self, schedule_ids: &[String]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for id in schedule_ids {
            match self.scheduler.remove_job(id).await {
                Ok(()) => {}
                Err(Error::ScheduleNotFound { id }) => missing.push(id),
                Err(err) => return Err(err),
            }
        }
        Ok(missing)
    }

    pub async fn list_backups(&self, filter: &BackupFilter, page: PageRequest) -> Result<Page<Backup>> {
        Ok(self.repo.list_backups(filter, page).await?)
    }

    pub async fn get_backup(&self, backup_id: &str) -> Result<Backup> {
        self.repo
            .get_backup(backup_id)
            .await?
            .ok_or_else(|| Error::BackupNotFound(backup_id.to_owned()))
    }

    pub async fn list_restores(&self, filter: &RestoreFilter) -> Result<Vec<RestoredBackup>> {
        Ok(self.repo.list_restores(filter).await?)
    }
}
