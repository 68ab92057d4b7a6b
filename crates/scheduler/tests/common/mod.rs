#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use volume_backup_backend::{BackendError, VolumeBackend, VolumeInfo};
use volume_backup_core::{Clock, ManualClock};
use volume_backup_scheduler::{JobExecutor, Scheduler};
use volume_backup_storage::BackupRepository;

/// Writes a small file in place of a real archive. Optionally slow, and keeps
/// track of how many archive calls overlapped.
#[derive(Default)]
pub struct FakeBackend {
    broken: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    archives: AtomicUsize,
    restores: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeBackend {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Most archive calls seen running at the same time.
    pub fn peak_overlap(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn break_volume(&self, volume: &str) {
        self.broken.lock().unwrap().insert(volume.to_owned());
    }

    pub fn archives(&self) -> usize {
        self.archives.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    fn is_broken(&self, volume: &str) -> bool {
        self.broken.lock().unwrap().contains(volume)
    }
}

#[async_trait]
impl VolumeBackend for FakeBackend {
    async fn volume_exists(&self, _volume: &str) -> Result<bool, BackendError> {
        Ok(true)
    }

    async fn volume_in_use(&self, _volume: &str) -> Result<bool, BackendError> {
        Ok(false)
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, BackendError> {
        Ok(Vec::new())
    }

    async fn create_archive(
        &self,
        volume: &str,
        dest_dir: &Path,
        filename: &str,
    ) -> Result<(), BackendError> {
        self.archives.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        let path = dest_dir.join(filename);
        if self.is_broken(volume) {
            return Err(BackendError::ArchiveMissing { path });
        }
        fs::write(&path, filename.as_bytes()).map_err(|source| BackendError::Io {
            program: "fake".to_owned(),
            source,
        })
    }

    async fn restore_archive(
        &self,
        _volume: &str,
        src_dir: &Path,
        filename: &str,
    ) -> Result<(), BackendError> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        let path = src_dir.join(filename);
        if !path.is_file() {
            return Err(BackendError::ArchiveMissing { path });
        }
        Ok(())
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub repo: BackupRepository,
    pub backend: Arc<FakeBackend>,
    pub clock: Arc<ManualClock>,
    pub executor: Arc<JobExecutor>,
}

impl Harness {
    pub fn new(start: DateTime<Utc>) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let repo = BackupRepository::sqlite(tmp.path()).unwrap();
        let backup_dir = tmp.path().join("backups");
        fs::create_dir_all(&backup_dir).unwrap();
        let backend = Arc::new(FakeBackend::default());
        let clock = Arc::new(ManualClock::new(start));
        let executor = Arc::new(JobExecutor::new(
            repo.ledger(),
            backend.clone(),
            backup_dir,
            clock.clone(),
        ));
        Self {
            tmp,
            repo,
            backend,
            clock,
            executor,
        }
    }

    /// Another executor over the same ledger, backend and backup directory.
    pub fn executor_with_clock(&self, clock: Arc<dyn Clock>) -> JobExecutor {
        JobExecutor::new(
            self.repo.ledger(),
            self.backend.clone(),
            self.executor.backup_dir().to_path_buf(),
            clock,
        )
    }

    /// A scheduler over this harness's store, as a restarted process would build it.
    pub fn scheduler(&self) -> Scheduler {
        let clock: Arc<dyn Clock> = self.clock.clone();
        Scheduler::new(
            self.repo.schedules(),
            self.executor.clone(),
            clock,
            Duration::from_millis(20),
        )
    }
}

/// Moves one second forward on every reading, so each attempt gets its own
/// archive filename.
pub struct TickingClock {
    next: Mutex<DateTime<Utc>>,
}

impl TickingClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            next: Mutex::new(start),
        }
    }
}

impl Clock for TickingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut next = self.next.lock().unwrap();
        let now = *next;
        *next += chrono::Duration::seconds(1);
        now
    }
}
