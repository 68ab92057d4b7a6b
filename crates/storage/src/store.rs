use anyhow::Result;
use chrono::{DateTime, Utc};
use volume_backup_core::{Backup, BackupFilter, Job, RestoreFilter, RestoredBackup};

/// Append-only record of backup and restore attempts, implemented by both
/// SQLite and Postgres backends.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a backup row, plus its filename index row when the backup
    /// succeeded, in one transaction.
    async fn record_backup(&self, backup: &Backup) -> Result<()>;

    /// Insert a restore row.
    async fn record_restore(&self, restore: &RestoredBackup) -> Result<()>;

    /// Backups matching `filter`, ordered by created_at then backup_id.
    async fn list_backups(&self, filter: &BackupFilter, offset: u64, limit: u64) -> Result<Vec<Backup>>;

    async fn count_backups(&self, filter: &BackupFilter) -> Result<u64>;

    async fn get_backup(&self, backup_id: &str) -> Result<Option<Backup>>;

    /// Resolve an archive filename through the filename index.
    async fn backup_for_filename(&self, backup_filename: &str) -> Result<Option<Backup>>;

    /// Restores matching `filter`, ordered by created_at then restore_id.
    async fn list_restores(&self, filter: &RestoreFilter) -> Result<Vec<RestoredBackup>>;
}

/// Durable job definitions owned by the scheduler.
#[async_trait::async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a job. Fails if the id or the name is already taken.
    async fn insert_job(&self, job: &Job) -> Result<()>;

    /// Delete a job, returning whether it existed.
    async fn delete_job(&self, job_id: &str) -> Result<bool>;

    /// All stored jobs in insertion order.
    async fn load_jobs(&self) -> Result<Vec<Job>>;

    async fn set_next_run(&self, job_id: &str, next_run_at: Option<DateTime<Utc>>) -> Result<()>;
}
