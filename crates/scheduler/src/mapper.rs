//! Conversions between scheduler jobs and the caller-facing [`Schedule`] view.

use volume_backup_core::{Crontab, CrontabFields, Job, Result, Schedule};

pub fn to_schedule(job: &Job) -> Schedule {
    Schedule {
        schedule_id: job.id.clone(),
        schedule_name: job.name.clone(),
        volume_name: job.volume_name.clone(),
        crontab: job.trigger,
    }
}

pub fn to_schedules<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Vec<Schedule> {
    jobs.into_iter().map(to_schedule).collect()
}

/// Validates raw crontab fields into a trigger.
pub fn to_trigger(fields: CrontabFields) -> Result<Crontab> {
    Ok(Crontab::try_from(fields)?)
}
