use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::Attempt;

/// Where a finished archive landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLocation {
    pub filename: String,
    pub path: String,
}

/// One backup attempt as written to the ledger. Rows are never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backup {
    pub backup_id: String,
    pub schedule_id: Option<String>,
    pub volume_name: String,
    pub backup_name: String,
    pub backup_filename: Option<String>,
    pub backup_path: Option<String>,
    pub successful: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Backup {
    pub fn succeeded(
        attempt: &Attempt,
        volume_name: impl Into<String>,
        backup_name: impl Into<String>,
        archive: ArchiveLocation,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            backup_id: attempt.ledger_id().to_owned(),
            schedule_id: attempt.schedule_id().map(str::to_owned),
            volume_name: volume_name.into(),
            backup_name: backup_name.into(),
            backup_filename: Some(archive.filename),
            backup_path: Some(archive.path),
            successful: true,
            error_message: None,
            created_at,
        }
    }

    pub fn failed(
        attempt: &Attempt,
        volume_name: impl Into<String>,
        backup_name: impl Into<String>,
        error_message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            backup_id: attempt.ledger_id().to_owned(),
            schedule_id: attempt.schedule_id().map(str::to_owned),
            volume_name: volume_name.into(),
            backup_name: backup_name.into(),
            backup_filename: None,
            backup_path: None,
            successful: false,
            error_message: Some(error_message.into()),
            created_at,
        }
    }

    /// Index row that accompanies a successful backup.
    pub fn filename_index(&self) -> Option<BackupFilename> {
        match (&self.backup_filename, self.successful) {
            (Some(filename), true) => Some(BackupFilename {
                backup_filename: filename.clone(),
                backup_id: self.backup_id.clone(),
            }),
            _ => None,
        }
    }
}

/// One restore attempt as written to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoredBackup {
    pub restore_id: String,
    pub schedule_id: Option<String>,
    pub restore_name: String,
    pub volume_name: String,
    pub backup_filename: String,
    pub restore_path: Option<String>,
    pub successful: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RestoredBackup {
    pub fn succeeded(
        attempt: &Attempt,
        volume_name: impl Into<String>,
        restore_name: impl Into<String>,
        archive: ArchiveLocation,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            restore_id: attempt.ledger_id().to_owned(),
            schedule_id: attempt.schedule_id().map(str::to_owned),
            restore_name: restore_name.into(),
            volume_name: volume_name.into(),
            backup_filename: archive.filename,
            restore_path: Some(archive.path),
            successful: true,
            error_message: None,
            created_at,
        }
    }

    pub fn failed(
        attempt: &Attempt,
        volume_name: impl Into<String>,
        restore_name: impl Into<String>,
        backup_filename: impl Into<String>,
        error_message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            restore_id: attempt.ledger_id().to_owned(),
            schedule_id: attempt.schedule_id().map(str::to_owned),
            restore_name: restore_name.into(),
            volume_name: volume_name.into(),
            backup_filename: backup_filename.into(),
            restore_path: None,
            successful: false,
            error_message: Some(error_message.into()),
            created_at,
        }
    }
}

/// Secondary index: archive filename -> producing backup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupFilename {
    pub backup_filename: String,
    pub backup_id: String,
}

/// Optional filters for backup listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupFilter {
    pub ids: Option<Vec<String>>,
    pub successful: Option<bool>,
}

/// Optional filters for restore listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreFilter {
    pub ids: Option<Vec<String>>,
    pub created_at: Option<DateTime<Utc>>,
    pub successful: Option<bool>,
    pub backup_filename: Option<String>,
}
