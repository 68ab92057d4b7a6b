use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use volume_backup_core::{
    Backup, BackupFilter, Crontab, Job, JobAction, RestoreFilter, RestoredBackup,
};

use crate::store::{LedgerStore, ScheduleStore};

const BACKUP_COLUMNS: &str = "backup_id, schedule_id, volume_name, backup_name, backup_filename,
     backup_path, successful, error_message, created_at";

const RESTORE_COLUMNS: &str = "restore_id, schedule_id, restore_name, volume_name, backup_filename,
     restore_path, successful, error_message, created_at";

const JOB_COLUMNS: &str = "job_id, job_name, volume_name, action, crontab, next_run_at, created_at";

/// Postgres-backed ledger and schedule store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connect to postgres")?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS backups (
                backup_id TEXT PRIMARY KEY,
                schedule_id TEXT,
                volume_name TEXT NOT NULL,
                backup_name TEXT NOT NULL,
                backup_filename TEXT,
                backup_path TEXT,
                successful BOOLEAN NOT NULL,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("create backups table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS backup_filenames (
                backup_filename TEXT PRIMARY KEY,
                backup_id TEXT NOT NULL REFERENCES backups (backup_id)
            )",
        )
        .execute(&self.pool)
        .await
        .context("create backup_filenames table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS restored_backups (
                restore_id TEXT PRIMARY KEY,
                schedule_id TEXT,
                restore_name TEXT NOT NULL,
                volume_name TEXT NOT NULL,
                backup_filename TEXT NOT NULL,
                restore_path TEXT,
                successful BOOLEAN NOT NULL,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("create restored_backups table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scheduled_jobs (
                seq BIGSERIAL,
                job_id TEXT PRIMARY KEY,
                job_name TEXT NOT NULL UNIQUE,
                volume_name TEXT NOT NULL,
                action TEXT NOT NULL,
                crontab TEXT,
                next_run_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("create scheduled_jobs table")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresStore {
    async fn record_backup(&self, backup: &Backup) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO backups ({BACKUP_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(&backup.backup_id)
        .bind(&backup.schedule_id)
        .bind(&backup.volume_name)
        .bind(&backup.backup_name)
        .bind(&backup.backup_filename)
        .bind(&backup.backup_path)
        .bind(backup.successful)
        .bind(&backup.error_message)
        .bind(backup.created_at)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert backup {}", backup.backup_id))?;

        if let Some(index) = backup.filename_index() {
            sqlx::query("INSERT INTO backup_filenames (backup_filename, backup_id) VALUES ($1, $2)")
                .bind(&index.backup_filename)
                .bind(&index.backup_id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("index backup filename {}", index.backup_filename))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_restore(&self, restore: &RestoredBackup) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO restored_backups ({RESTORE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(&restore.restore_id)
        .bind(&restore.schedule_id)
        .bind(&restore.restore_name)
        .bind(&restore.volume_name)
        .bind(&restore.backup_filename)
        .bind(&restore.restore_path)
        .bind(restore.successful)
        .bind(&restore.error_message)
        .bind(restore.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert restore {}", restore.restore_id))?;
        Ok(())
    }

    async fn list_backups(&self, filter: &BackupFilter, offset: u64, limit: u64) -> Result<Vec<Backup>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {BACKUP_COLUMNS} FROM backups"));
        push_backup_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at, backup_id LIMIT ")
            .push_bind(i64::try_from(limit)?)
            .push(" OFFSET ")
            .push_bind(i64::try_from(offset)?);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(pg_row_to_backup).collect()
    }

    async fn count_backups(&self, filter: &BackupFilter) -> Result<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM backups");
        push_backup_filter(&mut qb, filter);
        let count: i64 = qb.build().fetch_one(&self.pool).await?.try_get(0)?;
        Ok(count.try_into()?)
    }

    async fn get_backup(&self, backup_id: &str) -> Result<Option<Backup>> {
        let row = sqlx::query(&format!("SELECT {BACKUP_COLUMNS} FROM backups WHERE backup_id = $1"))
            .bind(backup_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(pg_row_to_backup).transpose()
    }

    async fn backup_for_filename(&self, backup_filename: &str) -> Result<Option<Backup>> {
        let row = sqlx::query(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backups WHERE backup_id =
             (SELECT backup_id FROM backup_filenames WHERE backup_filename = $1)"
        ))
        .bind(backup_filename)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(pg_row_to_backup).transpose()
    }

    async fn list_restores(&self, filter: &RestoreFilter) -> Result<Vec<RestoredBackup>> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {RESTORE_COLUMNS} FROM restored_backups WHERE TRUE"));
        if let Some(ids) = filter.ids.as_ref().filter(|ids| !ids.is_empty()) {
            qb.push(" AND restore_id = ANY(").push_bind(ids.clone()).push(")");
        }
        if let Some(created_at) = filter.created_at {
            qb.push(" AND created_at = ").push_bind(created_at);
        }
        if let Some(successful) = filter.successful {
            qb.push(" AND successful = ").push_bind(successful);
        }
        if let Some(filename) = &filter.backup_filename {
            qb.push(" AND backup_filename = ").push_bind(filename.clone());
        }
        qb.push(" ORDER BY created_at, restore_id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(pg_row_to_restore).collect()
    }
}

#[async_trait::async_trait]
impl ScheduleStore for PostgresStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO scheduled_jobs ({JOB_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.volume_name)
        .bind(serde_json::to_string(&job.action)?)
        .bind(job.trigger.as_ref().map(serde_json::to_string).transpose()?)
        .bind(job.next_run_at)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert job {}", job.name))?;
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs ORDER BY seq"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(pg_row_to_job).collect()
    }

    async fn set_next_run(&self, job_id: &str, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET next_run_at = $1 WHERE job_id = $2")
            .bind(next_run_at)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn push_backup_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &BackupFilter) {
    qb.push(" WHERE TRUE");
    if let Some(ids) = filter.ids.as_ref().filter(|ids| !ids.is_empty()) {
        qb.push(" AND backup_id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(successful) = filter.successful {
        qb.push(" AND successful = ").push_bind(successful);
    }
}

fn pg_row_to_backup(row: &PgRow) -> Result<Backup> {
    Ok(Backup {
        backup_id: row.try_get("backup_id")?,
        schedule_id: row.try_get("schedule_id")?,
        volume_name: row.try_get("volume_name")?,
        backup_name: row.try_get("backup_name")?,
        backup_filename: row.try_get("backup_filename")?,
        backup_path: row.try_get("backup_path")?,
        successful: row.try_get("successful")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn pg_row_to_restore(row: &PgRow) -> Result<RestoredBackup> {
    Ok(RestoredBackup {
        restore_id: row.try_get("restore_id")?,
        schedule_id: row.try_get("schedule_id")?,
        restore_name: row.try_get("restore_name")?,
        volume_name: row.try_get("volume_name")?,
        backup_filename: row.try_get("backup_filename")?,
        restore_path: row.try_get("restore_path")?,
        successful: row.try_get("successful")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn pg_row_to_job(row: &PgRow) -> Result<Job> {
    let action: String = row.try_get("action")?;
    let crontab: Option<String> = row.try_get("crontab")?;
    Ok(Job {
        id: row.try_get("job_id")?,
        name: row.try_get("job_name")?,
        volume_name: row.try_get("volume_name")?,
        action: serde_json::from_str::<JobAction>(&action).context("parse job action")?,
        trigger: crontab
            .map(|raw| serde_json::from_str::<Crontab>(&raw))
            .transpose()
            .context("parse job crontab")?,
        next_run_at: row.try_get("next_run_at")?,
        created_at: row.try_get("created_at")?,
    })
}
