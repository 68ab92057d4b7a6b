use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{error, info, warn};
use volume_backup_backend::{BackendError, VolumeBackend};
use volume_backup_core::{
    ArchiveLocation, Attempt, Backup, Clock, Error, Job, JobAction, RestoredBackup, Result,
};
use volume_backup_storage::LedgerStore;

use crate::locks::VolumeLocks;

/// Runs backup and restore attempts and writes exactly one ledger row per
/// attempt, success or failure.
pub struct JobExecutor {
    ledger: Arc<dyn LedgerStore>,
    backend: Arc<dyn VolumeBackend>,
    backup_dir: PathBuf,
    clock: Arc<dyn Clock>,
    locks: VolumeLocks,
}

impl JobExecutor {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        backend: Arc<dyn VolumeBackend>,
        backup_dir: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            backend,
            backup_dir: backup_dir.into(),
            clock,
            locks: VolumeLocks::default(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Archives `volume_name` into the backup directory and records the outcome.
    pub async fn create_backup(
        &self,
        volume_name: &str,
        attempt: Attempt,
        job_name: &str,
    ) -> Result<Backup> {
        self.run_tracked(BackupOp {
            attempt,
            volume_name,
            job_name,
        })
        .await
    }

    /// Extracts `backup_filename` from the backup directory into `volume_name`.
    pub async fn create_restore(
        &self,
        volume_name: &str,
        backup_filename: &str,
        attempt: Attempt,
        job_name: &str,
    ) -> Result<RestoredBackup> {
        self.run_tracked(RestoreOp {
            attempt,
            volume_name,
            backup_filename,
            job_name,
        })
        .await
    }

    /// One firing of `job`.
    pub async fn execute(&self, job: &Job) -> Result<()> {
        let attempt = job.attempt();
        match &job.action {
            JobAction::Backup => {
                self.create_backup(&job.volume_name, attempt, &job.name)
                    .await?;
            }
            JobAction::Restore { backup_filename } => {
                self.create_restore(&job.volume_name, backup_filename, attempt, &job.name)
                    .await?;
            }
        }
        Ok(())
    }

    /// Record, then propagate. A success row that fails to commit is rolled
    /// back by the store and replaced by a failure row for the same attempt.
    async fn run_tracked<Op: TrackedOperation>(&self, op: Op) -> Result<Op::Record> {
        let _volume = self.locks.acquire(op.volume_name()).await;
        let now = self.clock.now();
        let attempt_id = op.attempt().ledger_id().to_owned();
        info!(
            kind = Op::KIND,
            attempt_id = %attempt_id,
            volume = op.volume_name(),
            "starting attempt"
        );

        let failure = match op.perform(self.backend.as_ref(), &self.backup_dir, now).await {
            Ok(archive) => {
                let record = op.succeeded(archive, now);
                match op.commit(self.ledger.as_ref(), &record).await {
                    Ok(()) => {
                        info!(kind = Op::KIND, attempt_id = %attempt_id, "attempt recorded");
                        return Ok(record);
                    }
                    Err(err) => Error::Storage(err),
                }
            }
            Err(err) => op.failure(err),
        };

        warn!(kind = Op::KIND, attempt_id = %attempt_id, error = %failure, "attempt failed");
        let record = op.failed(failure.ledger_message(), now);
        if let Err(err) = op.commit(self.ledger.as_ref(), &record).await {
            let cause = format!("{err:#}");
            error!(
                kind = Op::KIND,
                attempt_id = %attempt_id,
                error = %cause,
                "could not record failed attempt"
            );
        }
        Err(failure)
    }
}

#[async_trait]
trait TrackedOperation: Send + Sync {
    type Record: Send + Sync;
    const KIND: &'static str;

    fn attempt(&self) -> &Attempt;

    fn volume_name(&self) -> &str;

    async fn perform(
        &self,
        backend: &dyn VolumeBackend,
        backup_dir: &Path,
        now: DateTime<Utc>,
    ) -> std::result::Result<ArchiveLocation, BackendError>;

    fn failure(&self, err: BackendError) -> Error;

    fn succeeded(&self, archive: ArchiveLocation, at: DateTime<Utc>) -> Self::Record;

    fn failed(&self, message: String, at: DateTime<Utc>) -> Self::Record;

    async fn commit(&self, ledger: &dyn LedgerStore, record: &Self::Record) -> anyhow::Result<()>;
}

struct BackupOp<'a> {
    attempt: Attempt,
    volume_name: &'a str,
    job_name: &'a str,
}

/// `{volume}-{timestamp}.tar.gz`, timestamp in UTC with microseconds.
pub(crate) fn archive_filename(volume_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{volume_name}-{}.tar.gz",
        now.to_rfc3339_opts(SecondsFormat::Micros, false)
    )
}

fn location(dir: &Path, filename: &str) -> ArchiveLocation {
    ArchiveLocation {
        filename: filename.to_owned(),
        path: dir.join(filename).to_string_lossy().into_owned(),
    }
}

#[async_trait]
impl<'a> TrackedOperation for BackupOp<'a> {
    type Record = Backup;
    const KIND: &'static str = "backup";

    fn attempt(&self) -> &Attempt {
        &self.attempt
    }

    fn volume_name(&self) -> &str {
        self.volume_name
    }

    async fn perform(
        &self,
        backend: &dyn VolumeBackend,
        backup_dir: &Path,
        now: DateTime<Utc>,
    ) -> std::result::Result<ArchiveLocation, BackendError> {
        let filename = archive_filename(self.volume_name, now);
        let path = backup_dir.join(&filename);
        if path.exists() {
            return Err(BackendError::ArchiveExists { path });
        }
        backend
            .create_archive(self.volume_name, backup_dir, &filename)
            .await?;
        Ok(location(backup_dir, &filename))
    }

    fn failure(&self, err: BackendError) -> Error {
        Error::BackupFailed {
            volume: self.volume_name.to_owned(),
            reason: err.to_string(),
        }
    }

    fn succeeded(&self, archive: ArchiveLocation, at: DateTime<Utc>) -> Backup {
        Backup::succeeded(&self.attempt, self.volume_name, self.job_name, archive, at)
    }

    fn failed(&self, message: String, at: DateTime<Utc>) -> Backup {
        Backup::failed(&self.attempt, self.volume_name, self.job_name, message, at)
    }

    async fn commit(&self, ledger: &dyn LedgerStore, record: &Backup) -> anyhow::Result<()> {
        ledger.record_backup(record).await
    }
}

struct RestoreOp<'a> {
    attempt: Attempt,
    volume_name: &'a str,
    backup_filename: &'a str,
    job_name: &'a str,
}

#[async_trait]
impl<'a> TrackedOperation for RestoreOp<'a> {
    type Record = RestoredBackup;
    const KIND: &'static str = "restore";

    fn attempt(&self) -> &Attempt {
        &self.attempt
    }

    fn volume_name(&self) -> &str {
        self.volume_name
    }

    async fn perform(
        &self,
        backend: &dyn VolumeBackend,
        backup_dir: &Path,
        _now: DateTime<Utc>,
    ) -> std::result::Result<ArchiveLocation, BackendError> {
        backend
            .restore_archive(self.volume_name, backup_dir, self.backup_filename)
            .await?;
        Ok(location(backup_dir, self.backup_filename))
    }

    fn failure(&self, err: BackendError) -> Error {
        Error::RestoreFailed {
            volume: self.volume_name.to_owned(),
            reason: err.to_string(),
        }
    }

    fn succeeded(&self, archive: ArchiveLocation, at: DateTime<Utc>) -> RestoredBackup {
        RestoredBackup::succeeded(&self.attempt, self.volume_name, self.job_name, archive, at)
    }

    fn failed(&self, message: String, at: DateTime<Utc>) -> RestoredBackup {
        RestoredBackup::failed(
            &self.attempt,
            self.volume_name,
            self.job_name,
            self.backup_filename,
            message,
            at,
        )
    }

    async fn commit(
        &self,
        ledger: &dyn LedgerStore,
        record: &RestoredBackup,
    ) -> anyhow::Result<()> {
        ledger.record_restore(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn archive_filename_uses_utc_micros() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap()
            + chrono::Duration::microseconds(89);
        assert_eq!(
            archive_filename("db-data", now),
            "db-data-2026-03-04T05:06:07.000089+00:00.tar.gz"
        );
    }
}
