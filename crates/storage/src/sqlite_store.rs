use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use volume_backup_core::{
    Backup, BackupFilter, Crontab, Job, JobAction, RestoreFilter, RestoredBackup,
};

use crate::store::{LedgerStore, ScheduleStore};

const BACKUP_COLUMNS: &str = "backup_id, schedule_id, volume_name, backup_name, backup_filename,
     backup_path, successful, error_message, created_at";

const RESTORE_COLUMNS: &str = "restore_id, schedule_id, restore_name, volume_name, backup_filename,
     restore_path, successful, error_message, created_at";

const JOB_COLUMNS: &str = "job_id, job_name, volume_name, action, crontab, next_run_at, created_at";

/// SQLite-backed ledger and schedule store. Each method opens a fresh connection.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let store = Self { db_path };
        store.init_db()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_db(&self) -> Result<()> {
        let conn = open(&self.db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS backups (
                backup_id TEXT PRIMARY KEY,
                schedule_id TEXT,
                volume_name TEXT NOT NULL,
                backup_name TEXT NOT NULL,
                backup_filename TEXT,
                backup_path TEXT,
                successful INTEGER NOT NULL,
                error_message TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS backup_filenames (
                backup_filename TEXT PRIMARY KEY,
                backup_id TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS restored_backups (
                restore_id TEXT PRIMARY KEY,
                schedule_id TEXT,
                restore_name TEXT NOT NULL,
                volume_name TEXT NOT NULL,
                backup_filename TEXT NOT NULL,
                restore_path TEXT,
                successful INTEGER NOT NULL,
                error_message TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS scheduled_jobs (
                job_id TEXT PRIMARY KEY,
                job_name TEXT NOT NULL UNIQUE,
                volume_name TEXT NOT NULL,
                action TEXT NOT NULL,
                crontab TEXT,
                next_run_at TEXT,
                created_at TEXT NOT NULL
            );",
        )
        .context("create metadata tables")?;
        Ok(())
    }
}

fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path).context("open metadata db")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

#[async_trait::async_trait]
impl LedgerStore for SqliteStore {
    async fn record_backup(&self, backup: &Backup) -> Result<()> {
        let backup = backup.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open(&db_path)?;
            let tx = conn.transaction()?;
            tx.execute(
                &format!("INSERT INTO backups ({BACKUP_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    backup.backup_id,
                    backup.schedule_id,
                    backup.volume_name,
                    backup.backup_name,
                    backup.backup_filename,
                    backup.backup_path,
                    backup.successful,
                    backup.error_message,
                    ts(&backup.created_at),
                ],
            )
            .with_context(|| format!("insert backup {}", backup.backup_id))?;
            if let Some(index) = backup.filename_index() {
                tx.execute(
                    "INSERT INTO backup_filenames (backup_filename, backup_id) VALUES (?1, ?2)",
                    params![index.backup_filename, index.backup_id],
                )
                .with_context(|| format!("index backup filename {}", index.backup_filename))?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    async fn record_restore(&self, restore: &RestoredBackup) -> Result<()> {
        let restore = restore.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            conn.execute(
                &format!(
                    "INSERT INTO restored_backups ({RESTORE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    restore.restore_id,
                    restore.schedule_id,
                    restore.restore_name,
                    restore.volume_name,
                    restore.backup_filename,
                    restore.restore_path,
                    restore.successful,
                    restore.error_message,
                    ts(&restore.created_at),
                ],
            )
            .with_context(|| format!("insert restore {}", restore.restore_id))?;
            Ok(())
        })
        .await?
    }

    async fn list_backups(&self, filter: &BackupFilter, offset: u64, limit: u64) -> Result<Vec<Backup>> {
        let (clause, mut values) = backup_where(filter);
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {BACKUP_COLUMNS} FROM backups{clause}
                 ORDER BY created_at, backup_id LIMIT ? OFFSET ?"
            ))?;
            values.push(Value::Integer(limit.try_into()?));
            values.push(Value::Integer(offset.try_into()?));
            let rows = stmt.query_map(params_from_iter(values), row_to_backup)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?
    }

    async fn count_backups(&self, filter: &BackupFilter) -> Result<u64> {
        let (clause, values) = backup_where(filter);
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM backups{clause}"),
                params_from_iter(values),
                |row| row.get(0),
            )?;
            Ok(count.try_into()?)
        })
        .await?
    }

    async fn get_backup(&self, backup_id: &str) -> Result<Option<Backup>> {
        let backup_id = backup_id.to_owned();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let mut stmt =
                conn.prepare(&format!("SELECT {BACKUP_COLUMNS} FROM backups WHERE backup_id = ?1"))?;
            let found = stmt.query_row([backup_id], row_to_backup).optional()?;
            Ok(found)
        })
        .await?
    }

    async fn backup_for_filename(&self, backup_filename: &str) -> Result<Option<Backup>> {
        let backup_filename = backup_filename.to_owned();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {BACKUP_COLUMNS} FROM backups WHERE backup_id =
                 (SELECT backup_id FROM backup_filenames WHERE backup_filename = ?1)"
            ))?;
            let found = stmt.query_row([backup_filename], row_to_backup).optional()?;
            Ok(found)
        })
        .await?
    }

    async fn list_restores(&self, filter: &RestoreFilter) -> Result<Vec<RestoredBackup>> {
        let (clause, values) = restore_where(filter);
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESTORE_COLUMNS} FROM restored_backups{clause} ORDER BY created_at, restore_id"
            ))?;
            let rows = stmt.query_map(params_from_iter(values), row_to_restore)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?
    }
}

#[async_trait::async_trait]
impl ScheduleStore for SqliteStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        let job = job.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            conn.execute(
                &format!("INSERT INTO scheduled_jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    job.id,
                    job.name,
                    job.volume_name,
                    serde_json::to_string(&job.action)?,
                    job.trigger.as_ref().map(serde_json::to_string).transpose()?,
                    job.next_run_at.as_ref().map(ts),
                    ts(&job.created_at),
                ],
            )
            .with_context(|| format!("insert job {}", job.name))?;
            Ok(())
        })
        .await?
    }

    async fn delete_job(&self, job_id: &str) -> Result<bool> {
        let job_id = job_id.to_owned();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let deleted = conn.execute("DELETE FROM scheduled_jobs WHERE job_id = ?1", [job_id])?;
            Ok(deleted > 0)
        })
        .await?
    }

    async fn load_jobs(&self) -> Result<Vec<Job>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let mut stmt =
                conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs ORDER BY rowid"))?;
            let rows = stmt.query_map([], row_to_job)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?
    }

    async fn set_next_run(&self, job_id: &str, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        let job_id = job_id.to_owned();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            conn.execute(
                "UPDATE scheduled_jobs SET next_run_at = ?1 WHERE job_id = ?2",
                params![next_run_at.as_ref().map(ts), job_id],
            )?;
            Ok(())
        })
        .await?
    }
}

fn backup_where(filter: &BackupFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    if let Some(ids) = filter.ids.as_ref().filter(|ids| !ids.is_empty()) {
        clauses.push(format!("backup_id IN ({})", vec!["?"; ids.len()].join(", ")));
        values.extend(ids.iter().cloned().map(Value::Text));
    }
    if let Some(successful) = filter.successful {
        clauses.push("successful = ?".to_owned());
        values.push(Value::Integer(i64::from(successful)));
    }
    (where_clause(&clauses), values)
}

fn restore_where(filter: &RestoreFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    if let Some(ids) = filter.ids.as_ref().filter(|ids| !ids.is_empty()) {
        clauses.push(format!("restore_id IN ({})", vec!["?"; ids.len()].join(", ")));
        values.extend(ids.iter().cloned().map(Value::Text));
    }
    if let Some(created_at) = &filter.created_at {
        clauses.push("created_at = ?".to_owned());
        values.push(Value::Text(ts(created_at)));
    }
    if let Some(successful) = filter.successful {
        clauses.push("successful = ?".to_owned());
        values.push(Value::Integer(i64::from(successful)));
    }
    if let Some(filename) = &filter.backup_filename {
        clauses.push("backup_filename = ?".to_owned());
        values.push(Value::Text(filename.clone()));
    }
    (where_clause(&clauses), values)
}

fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn row_to_backup(row: &rusqlite::Row) -> rusqlite::Result<Backup> {
    Ok(Backup {
        backup_id: row.get(0)?,
        schedule_id: row.get(1)?,
        volume_name: row.get(2)?,
        backup_name: row.get(3)?,
        backup_filename: row.get(4)?,
        backup_path: row.get(5)?,
        successful: row.get(6)?,
        error_message: row.get(7)?,
        created_at: parse_ts(8, row.get(8)?)?,
    })
}

fn row_to_restore(row: &rusqlite::Row) -> rusqlite::Result<RestoredBackup> {
    Ok(RestoredBackup {
        restore_id: row.get(0)?,
        schedule_id: row.get(1)?,
        restore_name: row.get(2)?,
        volume_name: row.get(3)?,
        backup_filename: row.get(4)?,
        restore_path: row.get(5)?,
        successful: row.get(6)?,
        error_message: row.get(7)?,
        created_at: parse_ts(8, row.get(8)?)?,
    })
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let action: String = row.get(3)?;
    let crontab: Option<String> = row.get(4)?;
    let next_run_at: Option<String> = row.get(5)?;
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        volume_name: row.get(2)?,
        action: serde_json::from_str::<JobAction>(&action).map_err(|e| to_sql_err(3, e))?,
        trigger: crontab
            .map(|raw| serde_json::from_str::<Crontab>(&raw))
            .transpose()
            .map_err(|e| to_sql_err(4, e))?,
        next_run_at: next_run_at.map(|raw| parse_ts(5, raw)).transpose()?,
        created_at: parse_ts(6, row.get(6)?)?,
    })
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| to_sql_err(column, e))
}

fn to_sql_err(column: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use volume_backup_core::{ArchiveLocation, Attempt, CrontabFields};

    fn store() -> (tempfile::TempDir, SqliteStore) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(tmp.path().join("metadata.db")).expect("store");
        (tmp, store)
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, minute, 0).unwrap()
    }

    fn ok_backup(id: &str, filename: &str, minute: u32) -> Backup {
        Backup::succeeded(
            &Attempt::one_shot(id),
            "db-data",
            "manual",
            ArchiveLocation {
                filename: filename.to_owned(),
                path: format!("/backups/{filename}"),
            },
            at(minute),
        )
    }

    fn index_rows(store: &SqliteStore, backup_id: &str) -> i64 {
        let conn = Connection::open(store.db_path()).unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM backup_filenames WHERE backup_id = ?1",
            [backup_id],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn successful_backup_writes_row_and_index() {
        let (_tmp, store) = store();
        let backup = ok_backup("b-1", "a.tar.gz", 0);
        store.record_backup(&backup).await.unwrap();

        assert_eq!(store.get_backup("b-1").await.unwrap(), Some(backup.clone()));
        assert_eq!(index_rows(&store, "b-1"), 1);
        assert_eq!(store.backup_for_filename("a.tar.gz").await.unwrap(), Some(backup));
    }

    #[tokio::test]
    async fn failed_backup_has_no_index_row() {
        let (_tmp, store) = store();
        let failed = Backup::failed(&Attempt::one_shot("b-1"), "db-data", "manual", "boom", at(0));
        store.record_backup(&failed).await.unwrap();

        let stored = store.get_backup("b-1").await.unwrap().unwrap();
        assert!(!stored.successful);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert_eq!(index_rows(&store, "b-1"), 0);
    }

    #[tokio::test]
    async fn index_conflict_rolls_back_backup_row() {
        let (_tmp, store) = store();
        store.record_backup(&ok_backup("b-1", "same.tar.gz", 0)).await.unwrap();

        let err = store
            .record_backup(&ok_backup("b-2", "same.tar.gz", 1))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("same.tar.gz"));
        assert_eq!(store.get_backup("b-2").await.unwrap(), None);
        assert_eq!(index_rows(&store, "b-2"), 0);
    }

    #[tokio::test]
    async fn duplicate_backup_id_is_rejected() {
        let (_tmp, store) = store();
        store.record_backup(&ok_backup("b-1", "a.tar.gz", 0)).await.unwrap();
        assert!(store.record_backup(&ok_backup("b-1", "b.tar.gz", 1)).await.is_err());
        assert_eq!(index_rows(&store, "b-1"), 1);
    }

    #[tokio::test]
    async fn list_and_count_apply_filters_and_paging() {
        let (_tmp, store) = store();
        for i in 1..=5 {
            store
                .record_backup(&ok_backup(&format!("b-{i}"), &format!("{i}.tar.gz"), i))
                .await
                .unwrap();
        }
        store
            .record_backup(&Backup::failed(&Attempt::one_shot("b-6"), "db-data", "manual", "x", at(6)))
            .await
            .unwrap();

        let all = BackupFilter::default();
        assert_eq!(store.count_backups(&all).await.unwrap(), 6);

        let page: Vec<_> = store
            .list_backups(&all, 2, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.backup_id)
            .collect();
        assert_eq!(page, ["b-3", "b-4"]);

        let failed = BackupFilter {
            successful: Some(false),
            ..BackupFilter::default()
        };
        assert_eq!(store.count_backups(&failed).await.unwrap(), 1);

        let picked = BackupFilter {
            ids: Some(vec!["b-2".to_owned(), "b-5".to_owned()]),
            successful: Some(true),
        };
        let ids: Vec<_> = store
            .list_backups(&picked, 0, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.backup_id)
            .collect();
        assert_eq!(ids, ["b-2", "b-5"]);
    }

    #[tokio::test]
    async fn restores_filter_by_filename_and_outcome() {
        let (_tmp, store) = store();
        let archive = |name: &str| ArchiveLocation {
            filename: name.to_owned(),
            path: format!("/backups/{name}"),
        };
        let first =
            RestoredBackup::succeeded(&Attempt::one_shot("r-1"), "db-data", "restore", archive("a.tar.gz"), at(1));
        let second = RestoredBackup::failed(
            &Attempt::one_shot("r-2"),
            "db-data",
            "restore",
            "b.tar.gz",
            "missing",
            at(2),
        );
        store.record_restore(&first).await.unwrap();
        store.record_restore(&second).await.unwrap();

        let by_name = store
            .list_restores(&RestoreFilter {
                backup_filename: Some("a.tar.gz".to_owned()),
                ..RestoreFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_name, vec![first.clone()]);

        let failed = store
            .list_restores(&RestoreFilter {
                successful: Some(false),
                ..RestoreFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(failed, vec![second]);

        let by_time = store
            .list_restores(&RestoreFilter {
                created_at: Some(at(1)),
                ..RestoreFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_time, vec![first]);
    }

    #[tokio::test]
    async fn jobs_survive_reopen_in_insertion_order() {
        let (tmp, store) = store();
        let tab = Crontab::try_from(CrontabFields {
            minute: "0".to_owned(),
            hour: "2".to_owned(),
            ..CrontabFields::default()
        })
        .unwrap();
        let nightly = Job::new("nightly-db", "db-data", JobAction::Backup, Some(tab), at(0)).unwrap();
        let restore = Job::new(
            "restore-db",
            "db-data",
            JobAction::Restore {
                backup_filename: "a.tar.gz".to_owned(),
            },
            None,
            at(0),
        )
        .unwrap();
        store.insert_job(&nightly).await.unwrap();
        store.insert_job(&restore).await.unwrap();
        drop(store);

        let reopened = SqliteStore::new(tmp.path().join("metadata.db")).unwrap();
        assert_eq!(reopened.load_jobs().await.unwrap(), vec![nightly.clone(), restore.clone()]);

        reopened.set_next_run(&nightly.id, Some(at(30))).await.unwrap();
        assert!(reopened.delete_job(&restore.id).await.unwrap());
        assert!(!reopened.delete_job(&restore.id).await.unwrap());

        let jobs = reopened.load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].next_run_at, Some(at(30)));
    }

    #[tokio::test]
    async fn job_names_are_unique() {
        let (_tmp, store) = store();
        let first = Job::new("nightly-db", "db-data", JobAction::Backup, None, at(0)).unwrap();
        let second = Job::new("nightly-db", "other", JobAction::Backup, None, at(0)).unwrap();
        store.insert_job(&first).await.unwrap();
        assert!(store.insert_job(&second).await.is_err());
    }
}
