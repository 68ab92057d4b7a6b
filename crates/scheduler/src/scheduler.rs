use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use volume_backup_core::{Clock, Crontab, Error, Job, JobAction, Result};
use volume_backup_storage::ScheduleStore;

use crate::executor::JobExecutor;

/// Owns the live job set, persists it through a [`ScheduleStore`], and fires
/// due jobs on the [`JobExecutor`]. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ScheduleStore>,
    executor: Arc<JobExecutor>,
    clock: Arc<dyn Clock>,
    max_sleep: Duration,
    jobs: RwLock<Vec<Job>>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    in_flight: watch::Sender<usize>,
}

/// Counts one dispatched execution until its task ends, however it ends.
struct InFlight(Arc<Inner>);

impl InFlight {
    fn enter(inner: &Arc<Inner>) -> Self {
        inner.in_flight.send_modify(|n| *n += 1);
        Self(Arc::clone(inner))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Scheduler {
    /// `max_sleep` bounds how long the loop sleeps without re-reading the clock.
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        executor: Arc<JobExecutor>,
        clock: Arc<dyn Clock>,
        max_sleep: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                store,
                executor,
                clock,
                max_sleep,
                jobs: RwLock::new(Vec::new()),
                wake: Notify::new(),
                shutdown,
                task: Mutex::new(None),
                in_flight,
            }),
        }
    }

    pub fn executor(&self) -> Arc<JobExecutor> {
        Arc::clone(&self.inner.executor)
    }

    /// Reloads persisted jobs and starts the timer loop.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            return Ok(());
        }
        self.restore_jobs().await?;
        self.inner.shutdown.send_replace(false);
        let rx = self.inner.shutdown.subscribe();
        *task = Some(tokio::spawn(self.clone().run(rx)));
        Ok(())
    }

    /// Stops the timer loop, then waits for every dispatched execution to
    /// finish and record its ledger row.
    pub async fn stop(&self) {
        let handle = self.inner.task.lock().await.take();
        if let Some(handle) = handle {
            self.inner.shutdown.send_replace(true);
            if let Err(err) = handle.await {
                warn!(error = %err, "scheduler loop ended abnormally");
            }
        }
        self.wait_idle().await;
    }

    /// Executions dispatched and not yet finished.
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// Resolves once no dispatched execution is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        let pending = *rx.borrow();
        if pending > 0 {
            info!(pending, "waiting for in-flight jobs");
        }
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Loads persisted jobs into the live set. Jobs whose fire time passed
    /// while the process was down stay due and fire once on the next tick.
    pub async fn restore_jobs(&self) -> Result<usize> {
        let loaded = self.inner.store.load_jobs().await?;
        let now = self.inner.clock.now();
        for job in loaded.iter().filter(|job| job.is_due(now)) {
            info!(
                job_id = %job.id,
                job_name = %job.name,
                missed = ?job.next_run_at,
                "job missed its fire time, catching up once"
            );
        }
        let count = loaded.len();
        *self.inner.jobs.write().await = loaded;
        self.inner.wake.notify_one();
        info!(count, "restored scheduled jobs");
        Ok(count)
    }

    /// Registers a job. Without a trigger it fires once, as soon as possible.
    pub async fn add_job(
        &self,
        name: &str,
        volume_name: &str,
        action: JobAction,
        trigger: Option<Crontab>,
    ) -> Result<Job> {
        let mut jobs = self.inner.jobs.write().await;
        if jobs.iter().any(|job| job.name == name) {
            return Err(Error::ScheduleConflict {
                name: name.to_owned(),
            });
        }
        let job = Job::new(name, volume_name, action, trigger, self.inner.clock.now())?;
        self.inner.store.insert_job(&job).await?;
        jobs.push(job.clone());
        drop(jobs);

        info!(
            job_id = %job.id,
            job_name = %job.name,
            volume = %job.volume_name,
            action = job.action.as_str(),
            recurring = job.is_schedule(),
            next_run_at = ?job.next_run_at,
            "job registered"
        );
        self.inner.wake.notify_one();
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> Option<Job> {
        self.inner
            .jobs
            .read()
            .await
            .iter()
            .find(|job| job.id == job_id)
            .cloned()
    }

    /// Live jobs in registration order.
    pub async fn list_jobs(&self) -> Vec<Job> {
        self.inner.jobs.read().await.clone()
    }

    pub async fn remove_job(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.inner.jobs.write().await;
        let Some(pos) = jobs.iter().position(|job| job.id == job_id) else {
            return Err(Error::ScheduleNotFound {
                id: job_id.to_owned(),
            });
        };
        self.inner.store.delete_job(job_id).await?;
        let job = jobs.remove(pos);
        info!(job_id = %job.id, job_name = %job.name, "job removed");
        Ok(())
    }

    /// Dispatches every job due at the clock's current time. One-shot jobs
    /// leave the live set; recurring jobs move to their next fire time after
    /// now, so any number of missed occurrences collapse into this one firing.
    pub async fn run_due_jobs(&self) -> Vec<JoinHandle<()>> {
        let now = self.inner.clock.now();
        let mut due = Vec::new();
        {
            let mut jobs = self.inner.jobs.write().await;
            let mut kept = Vec::with_capacity(jobs.len());
            for mut job in jobs.drain(..) {
                if !job.is_due(now) {
                    kept.push(job);
                    continue;
                }
                let next = job.trigger.and_then(|tab| tab.next_after(now));
                if next.is_some() {
                    job.next_run_at = next;
                    self.persist_next_run(&job.id, next).await;
                    due.push(job.clone());
                    kept.push(job);
                } else {
                    if let Err(err) = self.inner.store.delete_job(&job.id).await {
                        let cause = format!("{err:#}");
                        warn!(job_id = %job.id, error = %cause, "could not drop fired job");
                    }
                    due.push(job);
                }
            }
            *jobs = kept;
        }

        due.into_iter().map(|job| self.dispatch(job)).collect()
    }

    async fn persist_next_run(&self, job_id: &str, next: Option<DateTime<Utc>>) {
        if let Err(err) = self.inner.store.set_next_run(job_id, next).await {
            let cause = format!("{err:#}");
            warn!(job_id, error = %cause, "could not persist next fire time");
        }
    }

    fn dispatch(&self, job: Job) -> JoinHandle<()> {
        info!(job_id = %job.id, job_name = %job.name, action = job.action.as_str(), "job fired");
        let executor = Arc::clone(&self.inner.executor);
        let in_flight = InFlight::enter(&self.inner);
        tokio::spawn(async move {
            let _in_flight = in_flight;
            if let Err(err) = executor.execute(&job).await {
                warn!(job_id = %job.id, job_name = %job.name, error = %err, "job execution failed");
            }
        })
    }

    async fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.inner
            .jobs
            .read()
            .await
            .iter()
            .filter_map(|job| job.next_run_at)
            .min()
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler started");
        loop {
            self.run_due_jobs().await;

            let now = self.inner.clock.now();
            let sleep_for = match self.next_wake().await {
                Some(at) => (at - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(self.inner.max_sleep),
                None => self.inner.max_sleep,
            };
            debug!(?sleep_for, "scheduler sleeping");

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.inner.wake.notified() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("scheduler stopped");
    }
}
