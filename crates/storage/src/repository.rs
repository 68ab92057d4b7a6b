use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use volume_backup_core::{
    Backup, BackupFilter, Page, PageRequest, RestoreFilter, RestoredBackup,
};

use crate::postgres_store::PostgresStore;
use crate::sqlite_store::SqliteStore;
use crate::store::{LedgerStore, ScheduleStore};

/// Entry point to persisted state: the backup ledger and the schedule store,
/// backed by SQLite under `root/state` or by Postgres.
#[derive(Clone)]
pub struct BackupRepository {
    root: PathBuf,
    ledger: Arc<dyn LedgerStore>,
    schedules: Arc<dyn ScheduleStore>,
}

impl BackupRepository {
    pub async fn init(root: impl Into<PathBuf>, database_url: Option<&str>) -> Result<Self> {
        let root = root.into();
        match database_url {
            Some(url) => {
                fs::create_dir_all(&root)
                    .with_context(|| format!("create data root: {}", root.display()))?;
                info!("using postgres metadata store");
                let store = Arc::new(PostgresStore::new(url).await?);
                Ok(Self::from_parts(root, store.clone(), store))
            }
            None => Self::sqlite(root),
        }
    }

    /// SQLite store at `root/state/metadata.db`.
    pub fn sqlite(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let state_dir = root.join("state");
        fs::create_dir_all(&state_dir).context("create state directory")?;
        let store = Arc::new(SqliteStore::new(state_dir.join("metadata.db"))?);
        info!(db = %store.db_path().display(), "using sqlite metadata store");
        Ok(Self::from_parts(root, store.clone(), store))
    }

    pub fn from_parts(
        root: PathBuf,
        ledger: Arc<dyn LedgerStore>,
        schedules: Arc<dyn ScheduleStore>,
    ) -> Self {
        Self {
            root,
            ledger,
            schedules,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger(&self) -> Arc<dyn LedgerStore> {
        Arc::clone(&self.ledger)
    }

    pub fn schedules(&self) -> Arc<dyn ScheduleStore> {
        Arc::clone(&self.schedules)
    }

    pub async fn list_backups(&self, filter: &BackupFilter, request: PageRequest) -> Result<Page<Backup>> {
        let total = self.ledger.count_backups(filter).await?;
        let items = self
            .ledger
            .list_backups(filter, request.offset(), request.size())
            .await?;
        Ok(Page::new(items, request, total))
    }

    pub async fn get_backup(&self, backup_id: &str) -> Result<Option<Backup>> {
        self.ledger.get_backup(backup_id).await
    }

    pub async fn backup_for_filename(&self, backup_filename: &str) -> Result<Option<Backup>> {
        self.ledger.backup_for_filename(backup_filename).await
    }

    pub async fn list_restores(&self, filter: &RestoreFilter) -> Result<Vec<RestoredBackup>> {
        self.ledger.list_restores(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use volume_backup_core::{ArchiveLocation, Attempt};

    async fn seed(repo: &BackupRepository, count: u32) {
        for i in 1..=count {
            let filename = format!("test-backup-id-{i}.tar.gz");
            let backup = Backup::succeeded(
                &Attempt::one_shot(format!("test-backup-id-{i}")),
                "test-volume",
                "test-backup-name",
                ArchiveLocation {
                    path: format!("/volumes/backup/{filename}"),
                    filename,
                },
                Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            );
            repo.ledger().record_backup(&backup).await.unwrap();
        }
    }

    #[tokio::test]
    async fn sqlite_layout_lives_under_state() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = BackupRepository::sqlite(tmp.path()).expect("repo");
        assert!(tmp.path().join("state").join("metadata.db").exists());
        assert_eq!(repo.root(), tmp.path());
    }

    #[tokio::test]
    async fn paginates_five_items_by_two() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = BackupRepository::sqlite(tmp.path()).expect("repo");
        seed(&repo, 5).await;
        let all = BackupFilter::default();

        let first = repo.list_backups(&all, PageRequest::new(1, 2).unwrap()).await.unwrap();
        assert_eq!(first.total_items, 5);
        assert_eq!(first.total_pages, 3);
        let ids: Vec<_> = first.items.iter().map(|b| b.backup_id.as_str()).collect();
        assert_eq!(ids, ["test-backup-id-1", "test-backup-id-2"]);

        let third = repo.list_backups(&all, PageRequest::new(3, 2).unwrap()).await.unwrap();
        assert_eq!(third.items.len(), 1);
        assert_eq!(third.items[0].backup_id, "test-backup-id-5");

        let fourth = repo.list_backups(&all, PageRequest::new(4, 2).unwrap()).await.unwrap();
        assert!(fourth.items.is_empty());
        assert!(fourth
            .link_header("http://testserver/api/volumes/backup")
            .contains("<http://testserver/api/volumes/backup?page=3&size=2>; rel=\"last\""));
    }

    #[tokio::test]
    async fn default_page_holds_everything_small() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = BackupRepository::sqlite(tmp.path()).expect("repo");
        seed(&repo, 2).await;

        let page = repo
            .list_backups(&BackupFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!((page.page, page.size, page.total_items, page.total_pages), (1, 100, 2, 1));
        assert_eq!(
            repo.backup_for_filename("test-backup-id-2.tar.gz")
                .await
                .unwrap()
                .map(|b| b.backup_id),
            Some("test-backup-id-2".to_owned())
        );
    }
}
