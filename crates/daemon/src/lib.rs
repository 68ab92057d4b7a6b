pub mod config;
pub mod service;

pub use service::BackupService;
