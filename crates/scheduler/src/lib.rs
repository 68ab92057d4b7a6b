mod executor;
mod locks;
pub mod mapper;
mod scheduler;

pub use executor::JobExecutor;
pub use scheduler::Scheduler;
