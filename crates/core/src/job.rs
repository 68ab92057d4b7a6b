use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crontab::{Crontab, CrontabError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobAction {
    Backup,
    Restore { backup_filename: String },
}

impl JobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::Backup => "backup",
            JobAction::Restore { .. } => "restore",
        }
    }
}

/// A unit of work tracked by the scheduler. Jobs without a trigger fire once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub volume_name: String,
    pub action: JobAction,
    pub trigger: Option<Crontab>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Builds a job with a fresh id. One-shot jobs are due at `now`.
    pub fn new(
        name: impl Into<String>,
        volume_name: impl Into<String>,
        action: JobAction,
        trigger: Option<Crontab>,
        now: DateTime<Utc>,
    ) -> Result<Self, CrontabError> {
        let next_run_at = match &trigger {
            Some(tab) => tab.require_next_after(now)?,
            None => now,
        };
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            volume_name: volume_name.into(),
            action,
            trigger,
            next_run_at: Some(next_run_at),
            created_at: now,
        })
    }

    pub fn is_schedule(&self) -> bool {
        self.trigger.is_some()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at.is_some_and(|at| at <= now)
    }

    /// Ledger identity for one firing of this job.
    pub fn attempt(&self) -> Attempt {
        if self.is_schedule() {
            Attempt::scheduled(&self.id)
        } else {
            Attempt::one_shot(&self.id)
        }
    }
}

/// Identity of one concrete attempt in the ledger.
///
/// A one-shot request is recorded under the id the caller already holds. A
/// firing of a recurring schedule gets its own id and points back at the
/// schedule, so repeated firings never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    OneShot { id: String },
    Scheduled { schedule_id: String, attempt_id: String },
}

impl Attempt {
    pub fn one_shot(job_id: impl Into<String>) -> Self {
        Attempt::OneShot { id: job_id.into() }
    }

    pub fn scheduled(schedule_id: impl Into<String>) -> Self {
        Attempt::Scheduled {
            schedule_id: schedule_id.into(),
            attempt_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn ledger_id(&self) -> &str {
        match self {
            Attempt::OneShot { id } => id,
            Attempt::Scheduled { attempt_id, .. } => attempt_id,
        }
    }

    pub fn schedule_id(&self) -> Option<&str> {
        match self {
            Attempt::OneShot { .. } => None,
            Attempt::Scheduled { schedule_id, .. } => Some(schedule_id),
        }
    }
}

/// Caller-facing view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_id: String,
    pub schedule_name: String,
    pub volume_name: String,
    pub crontab: Option<Crontab>,
}
