pub mod postgres_store;
mod repository;
pub mod sqlite_store;
pub mod store;

pub use repository::BackupRepository;
pub use store::{LedgerStore, ScheduleStore};
