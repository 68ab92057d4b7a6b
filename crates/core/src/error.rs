use thiserror::Error;

use crate::crontab::CrontabError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("schedule job {name} already exists")]
    ScheduleConflict { name: String },
    #[error("schedule job {id} does not exist")]
    ScheduleNotFound { id: String },
    #[error(transparent)]
    InvalidCrontab(#[from] CrontabError),
    #[error("backup of volume {volume} failed: {reason}")]
    BackupFailed { volume: String, reason: String },
    #[error("restore of volume {volume} failed: {reason}")]
    RestoreFailed { volume: String, reason: String },
    #[error("volume {volume} does not exist")]
    VolumeNotFound { volume: String },
    #[error("volume {volume} is attached to a container")]
    VolumeBusy { volume: String },
    #[error("backup {0} does not exist")]
    BackupNotFound(String),
    #[error("invalid page request: {0}")]
    InvalidPage(&'static str),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    /// Text recorded in a ledger row's `error_message` for this failure.
    pub fn ledger_message(&self) -> String {
        match self {
            Error::BackupFailed { reason, .. } | Error::RestoreFailed { reason, .. } => {
                reason.clone()
            }
            Error::Storage(err) => format!("{err:#}"),
            other => other.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
