pub mod backup;
pub mod clock;
pub mod crontab;
pub mod error;
pub mod job;
pub mod pagination;

pub use backup::{
    ArchiveLocation, Backup, BackupFilename, BackupFilter, RestoreFilter, RestoredBackup,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use crontab::{CronField, CronUnit, Crontab, CrontabError, CrontabFields};
pub use error::{Error, Result};
pub use job::{Attempt, Job, JobAction, Schedule};
pub use pagination::{Page, PageRequest, DEFAULT_PAGE_SIZE};
