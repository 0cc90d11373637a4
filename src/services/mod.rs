//! Background services

pub mod config_manager;
pub mod fetcher;
pub mod reporter;
pub mod scheduler;

pub use config_manager::ConfigManager;
pub use fetcher::Fetcher;
pub use reporter::{LogReporter, Reporter};
pub use scheduler::{RoundSummary, Scheduler, SchedulerHandle};
